use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FilterConfig;
use crate::dom::{CheckboxSpec, ControlChange, ElementId, FeedDom};
use crate::filter::{run_pass, FilterContext, FilterState};
use crate::store::KeyValueStore;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// The injected "Hide Likes" / "Hide Retweets" bar and the listener that
/// turns checkbox changes into persisted state and visibility passes.
pub struct ControlBar {
    dom: Arc<dyn FeedDom>,
    bar: ElementId,
    listener: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl ControlBar {
    /// Restores the persisted toggles, renders the bar as the container's
    /// first child with those toggles already set, and applies them once.
    pub async fn mount(
        ctx: FilterContext,
        store: Arc<dyn KeyValueStore>,
        container: ElementId,
    ) -> Result<Self> {
        // Loaded before rendering so a restored filter never shows a
        // visible-then-hidden flash.
        let restored = match FilterState::load(store.as_ref()).await {
            Ok(state) => state,
            Err(err) => {
                log_warn!("starting with filters off, could not restore them: {err:?}");
                FilterState::default()
            }
        };

        let changes = ctx.dom.control_changes();
        let config = ctx.config.as_ref();
        let bar = ctx
            .dom
            .insert_control_bar(
                container,
                &config.bar_id,
                &[
                    CheckboxSpec {
                        id: &config.hide_likes_id,
                        label: &config.hide_likes_label,
                        checked: restored.hide_likes,
                    },
                    CheckboxSpec {
                        id: &config.hide_retweets_id,
                        label: &config.hide_retweets_label,
                        checked: restored.hide_retweets,
                    },
                ],
            )
            .with_context(|| format!("failed to insert control bar into {container}"))?;

        let report = run_pass(&ctx, container);
        log_info!(
            "control bar {bar} mounted with {:?}; {} entries, {} hidden on mount",
            restored,
            report.entries,
            report.visibility_writes
        );

        let cancel_token = CancellationToken::new();
        let dom = Arc::clone(&ctx.dom);
        let listener = tokio::spawn(change_listener(
            ctx,
            store,
            container,
            restored,
            changes,
            cancel_token.clone(),
        ));

        Ok(Self {
            dom,
            bar,
            listener: Some(listener),
            cancel_token,
        })
    }

    pub fn element(&self) -> ElementId {
        self.bar
    }

    /// False once the host page has re-rendered the bar away.
    pub fn is_attached(&self) -> bool {
        self.dom.is_attached(self.bar)
    }

    /// Stops reacting to changes and removes the bar. Nothing is persisted;
    /// the store already holds the last acknowledged state.
    pub async fn unmount(mut self) -> Result<()> {
        self.cancel_token.cancel();
        let joined = match self.listener.take() {
            Some(handle) => handle.await.context("control bar listener failed to join"),
            None => Ok(()),
        };
        self.dom.remove(self.bar);
        joined
    }
}

impl Drop for ControlBar {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn is_own_control(config: &FilterConfig, change: &ControlChange) -> bool {
    change.control_id == config.hide_likes_id || change.control_id == config.hide_retweets_id
}

async fn change_listener(
    ctx: FilterContext,
    store: Arc<dyn KeyValueStore>,
    container: ElementId,
    mut acknowledged: FilterState,
    mut changes: broadcast::Receiver<ControlChange>,
    cancel_token: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            received = changes.recv() => received,
        };

        match received {
            Ok(change) if is_own_control(&ctx.config, &change) => {}
            Ok(_) => continue,
            // Missed events are harmless: the controls are re-read below.
            Err(RecvError::Lagged(skipped)) => {
                log_warn!("control bar missed {skipped} change events");
            }
            Err(RecvError::Closed) => break,
        }

        let requested = FilterState::from_controls(ctx.dom.as_ref(), &ctx.config);
        if requested == acknowledged {
            continue;
        }

        match requested.save(store.as_ref()).await {
            Ok(()) => {
                acknowledged = requested;
                if cancel_token.is_cancelled() {
                    break;
                }
                let report = run_pass(&ctx, container);
                log_debug!(
                    "filters now {:?}; {} visibility changes",
                    requested,
                    report.visibility_writes
                );
            }
            Err(err) => {
                log_error!("reverting controls, filter change was not persisted: {err:?}");
                let config = ctx.config.as_ref();
                ctx.dom
                    .set_checkbox_checked(&config.hide_likes_id, acknowledged.hide_likes);
                ctx.dom
                    .set_checkbox_checked(&config.hide_retweets_id, acknowledged.hide_retweets);
                // Passes that ran while the write was pending used the
                // rejected state.
                run_pass(&ctx, container);
            }
        }
    }
}
