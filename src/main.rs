use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use notif_filter::{
    dom::ElementId, FeedDom, FilterConfig, JsonFileStore, KeyValueStore, MemoryDom, MemoryStore,
};
use tokio::time::sleep;

/// Drives a scripted visit to the notifications page on an in-memory
/// document and logs what the filter does.
///
/// Usage: notif-filter [config.json] [store.json]
#[tokio::main]
async fn main() -> Result<()> {
    notif_filter::init_logging();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => FilterConfig::load(&PathBuf::from(path))?,
        None => FilterConfig::default(),
    };
    let store: Arc<dyn KeyValueStore> = match args.next() {
        Some(path) => Arc::new(JsonFileStore::new(PathBuf::from(path))?),
        None => Arc::new(MemoryStore::new()),
    };

    let dom = Arc::new(MemoryDom::new());
    let handle = notif_filter::start(dom.clone(), dom.clone(), store, config.clone())?;

    dom.navigate(&config.target_path);
    sleep(Duration::from_millis(1200)).await;

    let column = dom.append_element(
        dom.document(),
        "div",
        &[("data-testid", "primaryColumn")],
    )?;
    let entries = vec![
        ("like", render_entry(&dom, column, &config.like_signature)?),
        ("retweet", render_entry(&dom, column, &config.retweet_signature)?),
        ("reply", render_entry(&dom, column, "M1.751 10c0-4.42")?),
    ];
    sleep(Duration::from_millis(1000)).await;
    report(&dom, &entries, "after attach");

    dom.click_checkbox(&config.hide_likes_id)
        .context("control bar was not mounted")?;
    sleep(Duration::from_millis(100)).await;
    report(&dom, &entries, "after hiding likes");

    let mut entries = entries;
    entries.push(("late like", render_entry(&dom, column, &config.like_signature)?));
    sleep(Duration::from_millis(100)).await;
    report(&dom, &entries, "after scrolling");

    dom.navigate("/home");
    sleep(Duration::from_millis(1000)).await;
    log::info!("left the page: {:?}", handle.status());

    handle.shutdown().await
}

fn render_entry(dom: &MemoryDom, column: ElementId, icon_path: &str) -> Result<ElementId> {
    let entry = dom.append_element(column, "article", &[("data-testid", "notification")])?;
    let svg = dom.append_element(entry, "svg", &[])?;
    dom.append_element(svg, "path", &[("d", icon_path)])?;
    Ok(entry)
}

fn report(dom: &MemoryDom, entries: &[(&str, ElementId)], stage: &str) {
    for (name, entry) in entries {
        let state = if dom.is_hidden(*entry) { "hidden" } else { "visible" };
        log::info!("{stage}: {name} entry {entry} is {state}");
    }
}
