use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FilterConfig;
use crate::dom::FeedDom;
use crate::store::{KeyValueStore, StoreMap};

use super::Classification;

pub const HIDE_LIKES_KEY: &str = "hideLikes";
pub const HIDE_RETWEETS_KEY: &str = "hideRetweets";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterState {
    pub hide_likes: bool,
    pub hide_retweets: bool,
}

impl FilterState {
    pub fn should_hide(&self, classification: Classification) -> bool {
        (self.hide_likes && classification.like) || (self.hide_retweets && classification.retweet)
    }

    /// Current state of the rendered checkboxes. A checkbox that is not in
    /// the document counts as unchecked, so an unmounted bar means no
    /// filtering.
    pub fn from_controls(dom: &dyn FeedDom, config: &FilterConfig) -> Self {
        Self {
            hide_likes: dom.checkbox_checked(&config.hide_likes_id).unwrap_or(false),
            hide_retweets: dom.checkbox_checked(&config.hide_retweets_id).unwrap_or(false),
        }
    }

    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let values = store
            .get(&[HIDE_LIKES_KEY, HIDE_RETWEETS_KEY])
            .await
            .context("failed to read filter state")?;
        Ok(Self::from_values(&values))
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store
            .set(self.to_values())
            .await
            .context("failed to persist filter state")
    }

    fn from_values(values: &StoreMap) -> Self {
        Self {
            hide_likes: truthy(values.get(HIDE_LIKES_KEY)),
            hide_retweets: truthy(values.get(HIDE_RETWEETS_KEY)),
        }
    }

    fn to_values(self) -> StoreMap {
        let mut values = StoreMap::new();
        values.insert(HIDE_LIKES_KEY.into(), Value::Bool(self.hide_likes));
        values.insert(HIDE_RETWEETS_KEY.into(), Value::Bool(self.hide_retweets));
        values
    }
}

/// Loose truthiness so values written by other tooling (`1`, `"yes"`) still
/// read as enabled.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
