use serde::Serialize;

use crate::config::FilterConfig;
use crate::dom::{ElementId, FeedDom};

/// Data keys stored on each entry once it has been inspected.
pub const CHECKED_KEY: &str = "likeOrRetweetChecked";
pub const LIKE_KEY: &str = "isLikeNotification";
pub const RETWEET_KEY: &str = "isRetweetNotification";

const FLAG_SET: &str = "true";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub like: bool,
    pub retweet: bool,
}

/// Decides what kind of notification an entry is.
///
/// Callers guarantee each entry is classified at most once; implementations
/// need not cache.
pub trait Classifier: Send + Sync {
    fn classify(&self, dom: &dyn FeedDom, entry: ElementId) -> Classification;
}

/// Matches the leading portion of the icon path data. Icons are rendered
/// with varying trailing precision, so only a stable prefix is compared.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    icon_selector: String,
    like_signature: String,
    retweet_signature: String,
}

impl SignatureClassifier {
    pub fn new(
        icon_selector: impl Into<String>,
        like_signature: impl Into<String>,
        retweet_signature: impl Into<String>,
    ) -> Self {
        Self {
            icon_selector: icon_selector.into(),
            like_signature: like_signature.into(),
            retweet_signature: retweet_signature.into(),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(
            config.icon_selector.clone(),
            config.like_signature.clone(),
            config.retweet_signature.clone(),
        )
    }
}

impl Classifier for SignatureClassifier {
    fn classify(&self, dom: &dyn FeedDom, entry: ElementId) -> Classification {
        let mut result = Classification::default();
        for icon in dom.query_all(entry, &self.icon_selector) {
            let path = dom.attribute(icon, "d").unwrap_or_default();
            if path.starts_with(&self.like_signature) {
                result.like = true;
            }
            if path.starts_with(&self.retweet_signature) {
                result.retweet = true;
            }
        }
        result
    }
}

/// Classifies every entry not yet marked and records the outcome on the
/// element. Returns how many entries were newly classified.
pub fn mark_entries(dom: &dyn FeedDom, classifier: &dyn Classifier, entries: &[ElementId]) -> usize {
    let mut marked = 0;
    for &entry in entries {
        if dom.data(entry, CHECKED_KEY).as_deref() == Some(FLAG_SET) {
            continue;
        }

        let classification = classifier.classify(dom, entry);
        if classification.like {
            dom.set_data(entry, LIKE_KEY, FLAG_SET);
        }
        if classification.retweet {
            dom.set_data(entry, RETWEET_KEY, FLAG_SET);
        }
        dom.set_data(entry, CHECKED_KEY, FLAG_SET);
        marked += 1;
    }
    marked
}

/// Classification recorded on the entry, `None` if it was never classified.
pub fn stored_classification(dom: &dyn FeedDom, entry: ElementId) -> Option<Classification> {
    if dom.data(entry, CHECKED_KEY).as_deref() != Some(FLAG_SET) {
        return None;
    }
    Some(Classification {
        like: dom.data(entry, LIKE_KEY).as_deref() == Some(FLAG_SET),
        retweet: dom.data(entry, RETWEET_KEY).as_deref() == Some(FLAG_SET),
    })
}
