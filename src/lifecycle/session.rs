use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dom::ElementId;
use crate::feed::{ControlBar, FeedWatcher};
use crate::filter::{run_pass, FilterContext};
use crate::store::KeyValueStore;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub container: ElementId,
    pub attached_at: DateTime<Utc>,
}

/// One route visit's worth of live state: the container being watched, its
/// mutation watcher and the mounted control bar.
pub struct WatchSession {
    info: SessionInfo,
    ctx: FilterContext,
    controls: ControlBar,
    watcher: FeedWatcher,
}

impl WatchSession {
    /// Mounts the controls, starts watching and runs one pass straight away
    /// instead of waiting for the first mutation.
    pub async fn attach(
        ctx: &FilterContext,
        store: Arc<dyn KeyValueStore>,
        container: ElementId,
    ) -> Result<Self> {
        let controls = ControlBar::mount(ctx.clone(), store, container).await?;
        let watcher = FeedWatcher::start(ctx.clone(), container);
        let report = run_pass(ctx, container);

        let info = SessionInfo {
            id: Uuid::new_v4(),
            container,
            attached_at: Utc::now(),
        };
        log_info!(
            "session {} attached to {container}: {} entries, {} newly classified",
            info.id,
            report.entries,
            report.classified
        );

        Ok(Self {
            info,
            ctx: ctx.clone(),
            controls,
            watcher,
        })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn container(&self) -> ElementId {
        self.info.container
    }

    /// Both the container and our bar are still in the document.
    pub fn is_healthy(&self) -> bool {
        self.ctx.dom.is_attached(self.info.container) && self.controls.is_attached()
    }

    pub fn refresh(&self) {
        run_pass(&self.ctx, self.info.container);
    }

    /// Stops the watcher before removing the bar so the removal itself does
    /// not trigger a pass.
    pub async fn detach(mut self) -> Result<()> {
        let stopped = self.watcher.stop().await;
        if let Err(err) = &stopped {
            log_error!("session {} watcher did not stop cleanly: {err:?}", self.info.id);
        }
        self.controls.unmount().await?;
        stopped
    }
}
