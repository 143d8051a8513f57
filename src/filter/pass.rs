use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::FilterConfig;
use crate::dom::{ElementId, FeedDom};

use super::{classifier::mark_entries, visibility, Classifier, FilterState};

/// Everything a classify-and-apply pass needs, shared by the control bar,
/// the feed watcher and the coordinator.
///
/// Clones share one pass lock: passes triggered from different tasks run
/// one at a time, so an entry is never classified twice and the last pass
/// applies the latest checkbox state.
#[derive(Clone)]
pub struct FilterContext {
    pub dom: Arc<dyn FeedDom>,
    pub classifier: Arc<dyn Classifier>,
    pub config: Arc<FilterConfig>,
    pass_lock: Arc<Mutex<()>>,
}

impl FilterContext {
    pub fn new(
        dom: Arc<dyn FeedDom>,
        classifier: Arc<dyn Classifier>,
        config: Arc<FilterConfig>,
    ) -> Self {
        Self {
            dom,
            classifier,
            config,
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn entries(&self, container: ElementId) -> Vec<ElementId> {
        self.dom.query_all(container, &self.config.entry_selector)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub entries: usize,
    pub classified: usize,
    pub visibility_writes: usize,
}

/// Classifies new entries under `container`, then re-applies visibility to
/// every entry currently present. Always works from the live document.
pub fn run_pass(ctx: &FilterContext, container: ElementId) -> PassReport {
    let _pass = match ctx.pass_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let dom = ctx.dom.as_ref();
    let entries = ctx.entries(container);
    let classified = mark_entries(dom, ctx.classifier.as_ref(), &entries);
    let state = FilterState::from_controls(dom, &ctx.config);
    let visibility_writes = visibility::apply(dom, state, &entries);

    PassReport {
        entries: entries.len(),
        classified,
        visibility_writes,
    }
}
