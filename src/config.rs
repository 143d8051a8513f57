use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Tunables for the feed filter. Everything the host page can change under us
/// (selectors, icon signatures, route) lives here rather than in control flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Route on which the controls are injected.
    pub target_path: String,

    /// How often the current route is checked.
    pub route_tick_ms: u64,
    /// How often a pending attach looks for the feed container.
    pub container_poll_ms: u64,

    pub container_selector: String,
    pub entry_selector: String,
    pub icon_selector: String,

    /// Leading portion of the icon path data; trailing precision varies.
    pub like_signature: String,
    pub retweet_signature: String,

    pub bar_id: String,
    pub hide_likes_id: String,
    pub hide_retweets_id: String,
    pub hide_likes_label: String,
    pub hide_retweets_label: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            target_path: "/notifications".into(),
            route_tick_ms: 800,
            container_poll_ms: 250,
            container_selector: r#"div[data-testid="primaryColumn"]"#.into(),
            entry_selector: r#"article[data-testid="notification"]"#.into(),
            icon_selector: "path[d]".into(),
            like_signature: "M20.884 13.19c-1.351 2.48".into(),
            retweet_signature: "M4.75 3.79l4.603 4.3-1.706 1.82".into(),
            bar_id: "my-tweaks-bar".into(),
            hide_likes_id: "tweaks-hide-likes".into(),
            hide_retweets_id: "tweaks-hide-retweets".into(),
            hide_likes_label: "Hide Likes".into(),
            hide_retweets_label: "Hide Retweets".into(),
        }
    }
}

impl FilterConfig {
    /// Reads a JSON config file. A missing file yields the defaults; missing
    /// keys inside the file fall back individually.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.route_tick_ms == 0 {
            bail!("routeTickMs must be greater than zero");
        }
        if self.container_poll_ms == 0 {
            bail!("containerPollMs must be greater than zero");
        }

        let required = [
            ("targetPath", &self.target_path),
            ("containerSelector", &self.container_selector),
            ("entrySelector", &self.entry_selector),
            ("iconSelector", &self.icon_selector),
            ("likeSignature", &self.like_signature),
            ("retweetSignature", &self.retweet_signature),
            ("barId", &self.bar_id),
            ("hideLikesId", &self.hide_likes_id),
            ("hideRetweetsId", &self.hide_retweets_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }

        if self.hide_likes_id == self.hide_retweets_id {
            bail!("hideLikesId and hideRetweetsId must differ");
        }

        Ok(())
    }

    pub fn route_tick_interval(&self) -> Duration {
        Duration::from_millis(self.route_tick_ms)
    }

    pub fn container_poll_interval(&self) -> Duration {
        Duration::from_millis(self.container_poll_ms)
    }
}
