use std::sync::Arc;
use std::time::Duration;

use notif_filter::dom::ElementId;
use notif_filter::{
    FeedDom, FilterConfig, FilterState, JsonFileStore, KeyValueStore, MemoryDom, MemoryStore,
    PhaseKind,
};
use serde_json::json;
use tokio::time::sleep;

const BAR: &str = r#"div[id="my-tweaks-bar"]"#;

fn column(dom: &MemoryDom) -> ElementId {
    dom.append_element(dom.document(), "div", &[("data-testid", "primaryColumn")])
        .unwrap()
}

fn notification(dom: &MemoryDom, column: ElementId, icon_path: &str) -> ElementId {
    let entry = dom
        .append_element(column, "article", &[("data-testid", "notification")])
        .unwrap();
    let svg = dom.append_element(entry, "svg", &[]).unwrap();
    dom.append_element(svg, "path", &[("d", icon_path)]).unwrap();
    entry
}

fn start(dom: &Arc<MemoryDom>, store: Arc<dyn KeyValueStore>) -> notif_filter::CoordinatorHandle {
    notif_filter::start(dom.clone(), dom.clone(), store, FilterConfig::default()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn hides_likes_but_not_retweets_or_others() {
    let config = FilterConfig::default();
    let dom = Arc::new(MemoryDom::new());
    let mut persisted = serde_json::Map::new();
    persisted.insert("hideLikes".into(), json!(true));
    persisted.insert("hideRetweets".into(), json!(false));
    let handle = start(&dom, Arc::new(MemoryStore::with_values(persisted)));

    dom.navigate("/notifications");
    sleep(Duration::from_millis(900)).await;
    let column = column(&dom);
    let like = notification(&dom, column, &format!("{}.5z", config.like_signature));
    let retweet = notification(&dom, column, &config.retweet_signature);
    let other = notification(&dom, column, "M12 2C6.48 2 2 6.48");
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(handle.status().phase, PhaseKind::Attached);
    assert!(dom.is_hidden(like));
    assert!(!dom.is_hidden(retweet));
    assert!(!dom.is_hidden(other));

    handle.shutdown().await.unwrap();
    assert_eq!(dom.count_matching(BAR), 0);
    assert_eq!(dom.live_observers(), 0);
}

#[tokio::test(start_paused = true)]
async fn restored_filter_applies_without_flash() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.json");
    let config = FilterConfig::default();

    {
        let dom = Arc::new(MemoryDom::new());
        let handle = start(&dom, Arc::new(JsonFileStore::new(store_path.clone()).unwrap()));
        column(&dom);
        dom.navigate("/notifications");
        sleep(Duration::from_millis(1000)).await;

        dom.click_checkbox(&config.hide_likes_id).unwrap();
        sleep(Duration::from_millis(10)).await;
        handle.shutdown().await.unwrap();
    }

    // Fresh page load against the same store, feed already rendered.
    let store = Arc::new(JsonFileStore::new(store_path).unwrap());
    assert_eq!(
        FilterState::load(store.as_ref()).await.unwrap(),
        FilterState { hide_likes: true, hide_retweets: false }
    );

    let dom = Arc::new(MemoryDom::new());
    let column = column(&dom);
    let like = notification(&dom, column, &config.like_signature);
    let handle = start(&dom, store);
    dom.navigate("/notifications");
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(dom.checkbox_checked(&config.hide_likes_id), Some(true));
    assert_eq!(dom.checkbox_checked(&config.hide_retweets_id), Some(false));
    assert!(dom.is_hidden(like));
    // Hidden on the first write, never shown in between.
    assert_eq!(dom.style_writes(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn container_found_after_leaving_route_is_not_attached() {
    let dom = Arc::new(MemoryDom::new());
    dom.navigate("/notifications");
    let handle = start(&dom, Arc::new(MemoryStore::new()));

    // First tick starts the wait; the user leaves before it resolves.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status().phase, PhaseKind::Waiting);
    dom.navigate("/home");
    column(&dom);

    sleep(Duration::from_millis(2000)).await;
    let status = handle.status();
    assert_eq!(status.phase, PhaseKind::Detached);
    assert_eq!(status.attaches, 0);
    assert_eq!(dom.count_matching(BAR), 0);
    assert_eq!(dom.live_observers(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_container_yields_a_single_session() {
    let dom = Arc::new(MemoryDom::new());
    let handle = start(&dom, Arc::new(MemoryStore::new()));
    dom.navigate("/notifications");

    // Several route ticks fire while the feed is still loading.
    sleep(Duration::from_millis(4000)).await;
    assert_eq!(handle.status().phase, PhaseKind::Waiting);
    column(&dom);
    sleep(Duration::from_millis(2000)).await;

    let status = handle.status();
    assert_eq!(status.phase, PhaseKind::Attached);
    assert_eq!(status.attaches, 1);
    assert_eq!(dom.count_matching(BAR), 1);
    assert_eq!(dom.live_observers(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn revisiting_the_route_replaces_the_session() {
    let config = FilterConfig::default();
    let dom = Arc::new(MemoryDom::new());
    let handle = start(&dom, Arc::new(MemoryStore::new()));
    let column = column(&dom);
    dom.navigate("/notifications");
    sleep(Duration::from_millis(1000)).await;
    let first = handle.status().session_id.unwrap();

    dom.navigate("/home");
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(handle.status().phase, PhaseKind::Detached);
    assert_eq!(dom.count_matching(BAR), 0);

    // Entries rendered while away are picked up on return.
    let like = notification(&dom, column, &config.like_signature);
    dom.navigate("/notifications");
    sleep(Duration::from_millis(1500)).await;

    let status = handle.status();
    assert_eq!(status.attaches, 2);
    assert_ne!(status.session_id, Some(first));
    assert_eq!(dom.count_matching(BAR), 1);
    assert_eq!(dom.live_observers(), 1);

    dom.click_checkbox(&config.hide_likes_id).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(dom.is_hidden(like));

    handle.shutdown().await.unwrap();
}
