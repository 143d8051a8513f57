pub mod config;
pub mod dom;
pub mod feed;
pub mod filter;
pub mod lifecycle;
pub mod store;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use config::FilterConfig;
pub use dom::{FeedDom, MemoryDom, RouteSource};
pub use filter::{Classification, Classifier, FilterState, SignatureClassifier};
pub use lifecycle::{CoordinatorHandle, CoordinatorStatus, LifecycleCoordinator, PhaseKind};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, SqliteStore};

use filter::FilterContext;

/// Initialise `env_logger`. Honours `RUST_LOG`, defaults to info.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Starts the filter against a host page using the icon-signature
/// classifier from `config`.
pub fn start(
    dom: Arc<dyn FeedDom>,
    route: Arc<dyn RouteSource>,
    store: Arc<dyn KeyValueStore>,
    config: FilterConfig,
) -> Result<CoordinatorHandle> {
    let classifier = Arc::new(SignatureClassifier::from_config(&config));
    start_with_classifier(dom, route, store, classifier, config)
}

/// Same as [`start`] with a caller-provided classification strategy.
pub fn start_with_classifier(
    dom: Arc<dyn FeedDom>,
    route: Arc<dyn RouteSource>,
    store: Arc<dyn KeyValueStore>,
    classifier: Arc<dyn Classifier>,
    config: FilterConfig,
) -> Result<CoordinatorHandle> {
    config.validate().context("invalid filter configuration")?;
    log::info!(
        "notification filter starting; watching {} every {}ms",
        config.target_path,
        config.route_tick_ms
    );

    let ctx = FilterContext::new(dom, classifier, Arc::new(config));
    Ok(LifecycleCoordinator::new(ctx, store, route).spawn())
}
