use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::{broadcast, mpsc};

use super::{
    CheckboxSpec, ControlChange, ElementId, FeedDom, MutationSubscription, RouteSource, Selector,
};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

const CONTROL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    dataset: BTreeMap<String, String>,
    text: Option<String>,
    hidden: bool,
    checked: Option<bool>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            dataset: BTreeMap::new(),
            text: None,
            hidden: false,
            checked: None,
            parent: None,
            children: Vec::new(),
        }
    }
}

struct Observer {
    id: u64,
    root: ElementId,
    signals: mpsc::UnboundedSender<()>,
}

struct DomState {
    nodes: HashMap<ElementId, Node>,
    document: ElementId,
    next_element: u64,
    observers: Vec<Observer>,
    next_observer: u64,
    location: String,
    style_writes: usize,
}

impl DomState {
    fn allocate(&mut self, node: Node) -> ElementId {
        let id = ElementId(self.next_element);
        self.next_element += 1;
        self.nodes.insert(id, node);
        id
    }

    fn is_connected(&self, element: ElementId) -> bool {
        let mut current = Some(element);
        while let Some(id) = current {
            if id == self.document {
                return true;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent);
        }
        false
    }

    fn is_inclusive_ancestor(&self, ancestor: ElementId, element: ElementId) -> bool {
        let mut current = Some(element);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent);
        }
        false
    }

    /// Pre-order descendants of `root`, excluding `root`.
    fn descendants(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = self
            .nodes
            .get(&root)
            .map(|node| node.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn matching(&self, root: ElementId, selector: &Selector) -> Vec<ElementId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|node| selector.matches(&node.tag, &node.attributes))
            })
            .collect()
    }

    fn find_checkbox(&self, id: &str) -> Option<ElementId> {
        self.descendants(self.document).into_iter().find(|element| {
            self.nodes.get(element).is_some_and(|node| {
                node.checked.is_some() && node.attributes.get("id").map(String::as_str) == Some(id)
            })
        })
    }

    /// Signals every observer whose subtree contains `parent`.
    fn notify_child_list(&mut self, parent: ElementId) {
        let targets: Vec<u64> = self
            .observers
            .iter()
            .filter(|observer| self.is_inclusive_ancestor(observer.root, parent))
            .map(|observer| observer.id)
            .collect();
        self.observers.retain(|observer| {
            !targets.contains(&observer.id) || observer.signals.send(()).is_ok()
        });
    }

    fn detach(&mut self, element: ElementId) -> Option<ElementId> {
        let parent = self.nodes.get(&element)?.parent?;
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|child| *child != element);
        }
        if let Some(node) = self.nodes.get_mut(&element) {
            node.parent = None;
        }
        Some(parent)
    }

    fn drop_subtree(&mut self, element: ElementId) {
        let mut doomed = self.descendants(element);
        doomed.push(element);
        for id in doomed {
            self.nodes.remove(&id);
        }
    }
}

/// In-process document with MutationObserver-style subscriptions and
/// checkbox change events. Stands in for the browser page.
pub struct MemoryDom {
    state: Mutex<DomState>,
    changes: broadcast::Sender<ControlChange>,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let document = ElementId(0);
        nodes.insert(document, Node::new("#document"));
        let (changes, _) = broadcast::channel(CONTROL_CHANNEL_CAPACITY);

        Self {
            state: Mutex::new(DomState {
                nodes,
                document,
                next_element: 1,
                observers: Vec::new(),
                next_observer: 1,
                location: "/".into(),
                style_writes: 0,
            }),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DomState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn document(&self) -> ElementId {
        self.lock().document
    }

    pub fn navigate(&self, path: &str) {
        self.lock().location = path.to_string();
    }

    /// Appends a new element as the last child of `parent`.
    pub fn append_element(
        &self,
        parent: ElementId,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> Result<ElementId> {
        let mut state = self.lock();
        if !state.nodes.contains_key(&parent) {
            bail!("parent element {parent} does not exist");
        }

        let mut node = Node::new(tag);
        node.parent = Some(parent);
        for (name, value) in attributes {
            node.attributes.insert(name.to_string(), value.to_string());
        }
        let id = state.allocate(node);
        if let Some(parent_node) = state.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }
        state.notify_child_list(parent);
        Ok(id)
    }

    /// Removes the element and its subtree. Returns `false` if it was already
    /// gone.
    pub fn remove_element(&self, element: ElementId) -> bool {
        let mut state = self.lock();
        if !state.nodes.contains_key(&element) || element == state.document {
            return false;
        }
        let parent = state.detach(element);
        state.drop_subtree(element);
        if let Some(parent) = parent {
            state.notify_child_list(parent);
        }
        true
    }

    /// Toggles a checkbox the way a user click does and emits the change.
    pub fn click_checkbox(&self, id: &str) -> Result<bool> {
        let checked = {
            let mut state = self.lock();
            let element = state
                .find_checkbox(id)
                .ok_or_else(|| anyhow!("no checkbox with id `{id}`"))?;
            let node = state
                .nodes
                .get_mut(&element)
                .context("checkbox vanished during click")?;
            let checked = !node.checked.unwrap_or(false);
            node.checked = Some(checked);
            checked
        };

        // No subscribers simply means no control bar is listening.
        let _ = self.changes.send(ControlChange {
            control_id: id.to_string(),
            checked,
        });
        Ok(checked)
    }

    pub fn children(&self, element: ElementId) -> Vec<ElementId> {
        self.lock()
            .nodes
            .get(&element)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, element: ElementId) -> Option<String> {
        self.lock().nodes.get(&element).map(|node| node.tag.clone())
    }

    /// Concatenated text of the element and its descendants.
    pub fn text_content(&self, element: ElementId) -> String {
        let state = self.lock();
        let mut ids = vec![element];
        ids.extend(state.descendants(element));
        ids.iter()
            .filter_map(|id| state.nodes.get(id).and_then(|node| node.text.clone()))
            .collect::<Vec<_>>()
            .join("")
    }

    /// Number of connected elements matching `selector`.
    pub fn count_matching(&self, selector: &str) -> usize {
        let Ok(selector) = Selector::parse(selector) else {
            return 0;
        };
        let state = self.lock();
        state.matching(state.document, &selector).len()
    }

    /// Visibility writes that actually changed an element.
    pub fn style_writes(&self) -> usize {
        self.lock().style_writes
    }

    pub fn live_observers(&self) -> usize {
        self.lock()
            .observers
            .iter()
            .filter(|observer| !observer.signals.is_closed())
            .count()
    }
}

impl FeedDom for MemoryDom {
    fn query_first(&self, root: Option<ElementId>, selector: &str) -> Option<ElementId> {
        let selector = match Selector::parse(selector) {
            Ok(selector) => selector,
            Err(err) => {
                log_warn!("ignoring query with invalid selector: {err}");
                return None;
            }
        };
        let state = self.lock();
        let root = root.unwrap_or(state.document);
        state.matching(root, &selector).into_iter().next()
    }

    fn query_all(&self, root: ElementId, selector: &str) -> Vec<ElementId> {
        let selector = match Selector::parse(selector) {
            Ok(selector) => selector,
            Err(err) => {
                log_warn!("ignoring query with invalid selector: {err}");
                return Vec::new();
            }
        };
        self.lock().matching(root, &selector)
    }

    fn attribute(&self, element: ElementId, name: &str) -> Option<String> {
        self.lock()
            .nodes
            .get(&element)
            .and_then(|node| node.attributes.get(name).cloned())
    }

    fn data(&self, element: ElementId, key: &str) -> Option<String> {
        self.lock()
            .nodes
            .get(&element)
            .and_then(|node| node.dataset.get(key).cloned())
    }

    fn set_data(&self, element: ElementId, key: &str, value: &str) {
        if let Some(node) = self.lock().nodes.get_mut(&element) {
            node.dataset.insert(key.to_string(), value.to_string());
        }
    }

    fn is_hidden(&self, element: ElementId) -> bool {
        self.lock()
            .nodes
            .get(&element)
            .is_some_and(|node| node.hidden)
    }

    fn set_hidden(&self, element: ElementId, hidden: bool) -> bool {
        let mut state = self.lock();
        let changed = match state.nodes.get_mut(&element) {
            Some(node) if node.hidden != hidden => {
                node.hidden = hidden;
                true
            }
            _ => false,
        };
        if changed {
            state.style_writes += 1;
        }
        changed
    }

    fn is_attached(&self, element: ElementId) -> bool {
        self.lock().is_connected(element)
    }

    fn insert_control_bar(
        &self,
        parent: ElementId,
        bar_id: &str,
        checkboxes: &[CheckboxSpec<'_>],
    ) -> Result<ElementId> {
        let mut state = self.lock();
        if !state.is_connected(parent) {
            bail!("cannot insert control bar into detached element {parent}");
        }

        let mut bar_node = Node::new("div");
        bar_node.attributes.insert("id".into(), bar_id.to_string());
        bar_node.parent = Some(parent);
        let bar = state.allocate(bar_node);

        for spec in checkboxes {
            let mut label_node = Node::new("label");
            label_node.parent = Some(bar);
            let label = state.allocate(label_node);

            let mut input_node = Node::new("input");
            input_node.attributes.insert("type".into(), "checkbox".into());
            input_node.attributes.insert("id".into(), spec.id.to_string());
            input_node.checked = Some(spec.checked);
            input_node.parent = Some(label);
            let input = state.allocate(input_node);

            let mut text_node = Node::new("#text");
            text_node.text = Some(spec.label.to_string());
            text_node.parent = Some(label);
            let text = state.allocate(text_node);

            if let Some(label_node) = state.nodes.get_mut(&label) {
                label_node.children = vec![input, text];
            }
            if let Some(bar_node) = state.nodes.get_mut(&bar) {
                bar_node.children.push(label);
            }
        }

        if let Some(parent_node) = state.nodes.get_mut(&parent) {
            parent_node.children.insert(0, bar);
        }
        state.notify_child_list(parent);
        Ok(bar)
    }

    fn remove(&self, element: ElementId) {
        self.remove_element(element);
    }

    fn checkbox_checked(&self, id: &str) -> Option<bool> {
        let state = self.lock();
        let element = state.find_checkbox(id)?;
        state.nodes.get(&element).and_then(|node| node.checked)
    }

    fn set_checkbox_checked(&self, id: &str, checked: bool) -> bool {
        let mut state = self.lock();
        let Some(element) = state.find_checkbox(id) else {
            return false;
        };
        match state.nodes.get_mut(&element) {
            Some(node) => {
                node.checked = Some(checked);
                true
            }
            None => false,
        }
    }

    fn observe(&self, root: ElementId) -> MutationSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_observer;
        state.next_observer += 1;
        state.observers.push(Observer {
            id,
            root,
            signals: tx,
        });
        MutationSubscription::new(id, rx)
    }

    fn disconnect(&self, subscription_id: u64) {
        self.lock()
            .observers
            .retain(|observer| observer.id != subscription_id);
    }

    fn control_changes(&self) -> broadcast::Receiver<ControlChange> {
        self.changes.subscribe()
    }
}

impl RouteSource for MemoryDom {
    fn current_path(&self) -> String {
        self.lock().location.clone()
    }
}
