//! Seams to the host page: the document the feed renders into and the
//! current route. Everything the filter does to the page goes through
//! [`FeedDom`], so the engine runs the same against a browser binding or the
//! in-memory [`MemoryDom`].

pub mod memory;
pub mod selector;

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

pub use memory::MemoryDom;
pub use selector::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(pub(crate) u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A checkbox the control bar asks the host to render.
#[derive(Debug, Clone, Copy)]
pub struct CheckboxSpec<'a> {
    pub id: &'a str,
    pub label: &'a str,
    pub checked: bool,
}

/// A user-driven change of a checkbox, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlChange {
    pub control_id: String,
    pub checked: bool,
}

/// Structural-mutation subscription on one subtree.
///
/// Signals carry no payload: a receiver re-derives everything from the
/// document. The host may coalesce several mutations into one signal or
/// deliver one per mutation; [`MutationSubscription::drain`] folds whatever
/// is queued into the batch being handled.
#[derive(Debug)]
pub struct MutationSubscription {
    id: u64,
    signals: mpsc::UnboundedReceiver<()>,
}

impl MutationSubscription {
    pub fn new(id: u64, signals: mpsc::UnboundedReceiver<()>) -> Self {
        Self { id, signals }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next batch. Returns `false` once the host has
    /// disconnected the subscription.
    pub async fn changed(&mut self) -> bool {
        self.signals.recv().await.is_some()
    }

    /// Discards queued signals; returns how many were folded.
    pub fn drain(&mut self) -> usize {
        let mut folded = 0;
        while self.signals.try_recv().is_ok() {
            folded += 1;
        }
        folded
    }
}

pub trait FeedDom: Send + Sync {
    /// First element matching `selector` under `root`, or anywhere in the
    /// document when `root` is `None`.
    fn query_first(&self, root: Option<ElementId>, selector: &str) -> Option<ElementId>;
    /// All descendants of `root` matching `selector`, in document order.
    fn query_all(&self, root: ElementId, selector: &str) -> Vec<ElementId>;

    fn attribute(&self, element: ElementId, name: &str) -> Option<String>;
    fn data(&self, element: ElementId, key: &str) -> Option<String>;
    fn set_data(&self, element: ElementId, key: &str, value: &str);

    fn is_hidden(&self, element: ElementId) -> bool;
    /// Returns whether the element's visibility actually changed.
    fn set_hidden(&self, element: ElementId, hidden: bool) -> bool;

    /// Whether the element is still connected to the document.
    fn is_attached(&self, element: ElementId) -> bool;

    /// Builds the control bar and inserts it as the first child of `parent`.
    fn insert_control_bar(
        &self,
        parent: ElementId,
        bar_id: &str,
        checkboxes: &[CheckboxSpec<'_>],
    ) -> Result<ElementId>;
    fn remove(&self, element: ElementId);

    /// `None` when no connected checkbox has this id.
    fn checkbox_checked(&self, id: &str) -> Option<bool>;
    /// Programmatic update; does not emit a [`ControlChange`].
    fn set_checkbox_checked(&self, id: &str, checked: bool) -> bool;

    fn observe(&self, root: ElementId) -> MutationSubscription;
    fn disconnect(&self, subscription_id: u64);

    fn control_changes(&self) -> broadcast::Receiver<ControlChange>;
}

/// Read-only access to the page route. Polled, never subscribed.
pub trait RouteSource: Send + Sync {
    fn current_path(&self) -> String;
}
