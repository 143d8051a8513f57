use crate::dom::{ElementId, FeedDom};

use super::{classifier::stored_classification, FilterState};

/// Shows or hides each entry according to `state` and its recorded
/// classification. Never classifies; an unclassified entry is shown.
/// Only writes when an entry's visibility changes and returns the number of
/// writes, so repeating a call with the same inputs writes nothing.
pub fn apply(dom: &dyn FeedDom, state: FilterState, entries: &[ElementId]) -> usize {
    let mut writes = 0;
    for &entry in entries {
        let hide = stored_classification(dom, entry)
            .is_some_and(|classification| state.should_hide(classification));
        if dom.set_hidden(entry, hide) {
            writes += 1;
        }
    }
    writes
}
