use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dom::{ElementId, FeedDom, MutationSubscription};
use crate::filter::{run_pass, FilterContext};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Re-runs the classify-and-apply pass whenever the container's subtree
/// changes structurally.
pub struct FeedWatcher {
    dom: Arc<dyn FeedDom>,
    container: ElementId,
    subscription_id: u64,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl FeedWatcher {
    pub fn start(ctx: FilterContext, container: ElementId) -> Self {
        let subscription = ctx.dom.observe(container);
        let subscription_id = subscription.id();
        let dom = Arc::clone(&ctx.dom);

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(
            ctx,
            container,
            subscription,
            cancel_token.clone(),
        ));

        log_info!("watching {container} (subscription {subscription_id})");

        Self {
            dom,
            container,
            subscription_id,
            handle: Some(handle),
            cancel_token: Some(cancel_token),
        }
    }

    pub fn container(&self) -> ElementId {
        self.container
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Once this returns no further pass runs for this subscription.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let joined = match self.handle.take() {
            Some(handle) => handle
                .await
                .context("feed watcher task failed to join")
                .map(|_| ()),
            None => return Ok(()),
        };
        self.dom.disconnect(self.subscription_id);
        joined
    }
}

impl Drop for FeedWatcher {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
            self.dom.disconnect(self.subscription_id);
        }
    }
}

async fn watch_loop(
    ctx: FilterContext,
    container: ElementId,
    mut subscription: MutationSubscription,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_debug!("feed watcher on {container} shutting down");
                break;
            }
            alive = subscription.changed() => {
                if !alive {
                    log_debug!("mutation subscription on {container} closed by host");
                    break;
                }
                // One pass covers every mutation queued so far.
                let folded = subscription.drain();
                let report = run_pass(&ctx, container);
                log_debug!(
                    "mutation batch of {} on {container}: {} entries, {} newly classified, {} visibility changes",
                    folded + 1,
                    report.entries,
                    report.classified,
                    report.visibility_writes
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::FilterConfig;
    use crate::dom::{CheckboxSpec, MemoryDom};
    use crate::filter::{classifier::stored_classification, Classification, Classifier, SignatureClassifier};

    struct CountingClassifier {
        inner: SignatureClassifier,
        calls: AtomicUsize,
    }

    impl Classifier for CountingClassifier {
        fn classify(&self, dom: &dyn FeedDom, entry: ElementId) -> Classification {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.classify(dom, entry)
        }
    }

    /// Holds each classification long enough for other passes to overlap it.
    struct SlowClassifier {
        inner: SignatureClassifier,
        calls: AtomicUsize,
    }

    impl Classifier for SlowClassifier {
        fn classify(&self, dom: &dyn FeedDom, entry: ElementId) -> Classification {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.inner.classify(dom, entry)
        }
    }

    fn notification(dom: &MemoryDom, column: ElementId, path: &str) -> ElementId {
        let entry = dom
            .append_element(column, "article", &[("data-testid", "notification")])
            .unwrap();
        dom.append_element(entry, "path", &[("d", path)]).unwrap();
        entry
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_entries_are_classified_once_and_filtered() {
        let config = FilterConfig::default();
        let dom = Arc::new(MemoryDom::new());
        let column = dom.append_element(dom.document(), "div", &[]).unwrap();
        dom.insert_control_bar(
            column,
            &config.bar_id,
            &[CheckboxSpec { id: &config.hide_retweets_id, label: "Hide Retweets", checked: true }],
        )
        .unwrap();

        let spy = Arc::new(CountingClassifier {
            inner: SignatureClassifier::from_config(&config),
            calls: AtomicUsize::new(0),
        });
        let ctx = FilterContext::new(dom.clone(), spy.clone(), Arc::new(config.clone()));
        let mut watcher = FeedWatcher::start(ctx, column);
        assert!(watcher.is_running());

        let retweet = notification(&dom, column, &config.retweet_signature);
        let plain = notification(&dom, column, "M1 1");
        settle().await;
        assert!(dom.is_hidden(retweet));
        assert!(!dom.is_hidden(plain));

        // Further growth re-scans everything but only classifies the newcomer.
        let like = notification(&dom, column, &config.like_signature);
        settle().await;
        assert_eq!(spy.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            stored_classification(dom.as_ref(), like),
            Some(Classification { like: true, retweet: false })
        );
        assert!(!dom.is_hidden(like));

        watcher.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_passes_and_disconnects() {
        let config = FilterConfig::default();
        let dom = Arc::new(MemoryDom::new());
        let column = dom.append_element(dom.document(), "div", &[]).unwrap();
        let ctx = FilterContext::new(
            dom.clone(),
            Arc::new(SignatureClassifier::from_config(&config)),
            Arc::new(config.clone()),
        );

        let mut watcher = FeedWatcher::start(ctx, column);
        assert_eq!(dom.live_observers(), 1);
        watcher.stop().await.unwrap();
        assert_eq!(dom.live_observers(), 0);
        assert!(!watcher.is_running());

        let late = notification(&dom, column, &config.like_signature);
        settle().await;
        assert_eq!(stored_classification(dom.as_ref(), late), None);

        // Stopping again is a no-op.
        watcher.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_passes_on_worker_threads_classify_once() {
        let config = FilterConfig::default();
        let dom = Arc::new(MemoryDom::new());
        let column = dom.append_element(dom.document(), "div", &[]).unwrap();
        let slow = Arc::new(SlowClassifier {
            inner: SignatureClassifier::from_config(&config),
            calls: AtomicUsize::new(0),
        });
        let ctx = FilterContext::new(dom.clone(), slow.clone(), Arc::new(config.clone()));
        let mut watcher = FeedWatcher::start(ctx.clone(), column);

        let entry = notification(&dom, column, &config.like_signature);
        // Refresh passes racing the mutation-triggered one.
        let refreshes: Vec<_> = (0..3)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { run_pass(&ctx, column) })
            })
            .collect();
        for refresh in refreshes {
            refresh.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            stored_classification(dom.as_ref(), entry),
            Some(Classification { like: true, retweet: false })
        );

        watcher.stop().await.unwrap();
    }
}
