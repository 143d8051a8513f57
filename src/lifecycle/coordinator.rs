use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dom::{ElementId, FeedDom, RouteSource};
use crate::filter::FilterContext;
use crate::store::KeyValueStore;

use super::session::WatchSession;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseKind {
    Detached,
    Waiting,
    Attached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub phase: PhaseKind,
    pub session_id: Option<Uuid>,
    /// Sessions attached since start.
    pub attaches: u64,
}

struct PendingAttach {
    generation: u64,
    cancel_token: CancellationToken,
    _task: JoinHandle<()>,
}

enum Phase {
    Detached,
    Waiting(PendingAttach),
    Attached(WatchSession),
}

#[derive(Debug)]
struct ContainerFound {
    generation: u64,
    container: ElementId,
}

enum TickAction {
    Idle,
    BeginWait,
    CancelWait,
    Refresh,
    Reattach,
    Detach,
}

/// Route-driven reconciliation: attaches a [`WatchSession`] while the page
/// is on the target route and tears it down when the user leaves.
///
/// All transitions happen on the task that owns the coordinator, and the
/// session only ever lives inside `Phase::Attached`, so two sessions can
/// never coexist. A container wait that resolves after its route visit has
/// ended is recognised by its generation and by a fresh route check, and
/// dropped.
pub struct LifecycleCoordinator {
    ctx: FilterContext,
    store: Arc<dyn KeyValueStore>,
    route: Arc<dyn RouteSource>,
    phase: Phase,
    generation: u64,
    attaches: u64,
    found_tx: mpsc::UnboundedSender<ContainerFound>,
    found_rx: mpsc::UnboundedReceiver<ContainerFound>,
    status_tx: watch::Sender<CoordinatorStatus>,
}

impl LifecycleCoordinator {
    pub fn new(
        ctx: FilterContext,
        store: Arc<dyn KeyValueStore>,
        route: Arc<dyn RouteSource>,
    ) -> Self {
        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(CoordinatorStatus {
            phase: PhaseKind::Detached,
            session_id: None,
            attaches: 0,
        });

        Self {
            ctx,
            store,
            route,
            phase: Phase::Detached,
            generation: 0,
            attaches: 0,
            found_tx,
            found_rx,
            status_tx,
        }
    }

    pub fn phase(&self) -> PhaseKind {
        match self.phase {
            Phase::Detached => PhaseKind::Detached,
            Phase::Waiting(_) => PhaseKind::Waiting,
            Phase::Attached(_) => PhaseKind::Attached,
        }
    }

    pub fn session(&self) -> Option<&WatchSession> {
        match &self.phase {
            Phase::Attached(session) => Some(session),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status_tx.subscribe()
    }

    fn on_target_route(&self) -> bool {
        self.route.current_path() == self.ctx.config.target_path
    }

    /// One route check. Driven by the run loop every `route_tick_interval`.
    pub async fn tick(&mut self) {
        let on_target = self.on_target_route();
        let action = match (&self.phase, on_target) {
            (Phase::Detached, true) => TickAction::BeginWait,
            (Phase::Detached, false) => TickAction::Idle,
            (Phase::Waiting(_), true) => TickAction::Idle,
            (Phase::Waiting(_), false) => TickAction::CancelWait,
            (Phase::Attached(session), true) if session.is_healthy() => TickAction::Refresh,
            (Phase::Attached(_), true) => TickAction::Reattach,
            (Phase::Attached(_), false) => TickAction::Detach,
        };

        match action {
            TickAction::Idle => {}
            TickAction::BeginWait => self.begin_wait(),
            TickAction::CancelWait => {
                log_info!("left {} before the feed appeared", self.ctx.config.target_path);
                self.cancel_wait();
            }
            TickAction::Refresh => {
                // Cheap thanks to classify-once; covers missed mutation signals.
                if let Some(session) = self.session() {
                    session.refresh();
                }
            }
            TickAction::Reattach => {
                log_info!("feed was re-rendered without our controls, re-attaching");
                self.detach().await;
                self.begin_wait();
            }
            TickAction::Detach => self.detach().await,
        }

        self.publish();
    }

    fn begin_wait(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let cancel_token = CancellationToken::new();

        let task = tokio::spawn(wait_for_container(
            Arc::clone(&self.ctx.dom),
            self.ctx.config.container_selector.clone(),
            self.ctx.config.container_poll_interval(),
            generation,
            self.found_tx.clone(),
            cancel_token.clone(),
        ));

        log_debug!("waiting for feed container (generation {generation})");
        self.phase = Phase::Waiting(PendingAttach {
            generation,
            cancel_token,
            _task: task,
        });
    }

    fn cancel_wait(&mut self) {
        if let Phase::Waiting(pending) = std::mem::replace(&mut self.phase, Phase::Detached) {
            pending.cancel_token.cancel();
        } else {
            log_debug!("cancel_wait called outside of a pending attach");
        }
    }

    async fn handle_found(&mut self, found: ContainerFound) {
        let current = match &self.phase {
            Phase::Waiting(pending) => pending.generation == found.generation,
            _ => false,
        };
        if !current {
            log_debug!(
                "discarding container {} from superseded wait (generation {})",
                found.container,
                found.generation
            );
            return;
        }

        // The wait is current but the route may have changed since the last
        // tick; attaching now would bind to a page the user already left.
        if !self.on_target_route() {
            log_info!("feed container appeared after leaving the route, ignoring it");
            self.cancel_wait();
            self.publish();
            return;
        }

        if !self.ctx.dom.is_attached(found.container) {
            log_debug!("container {} vanished before attach, waiting again", found.container);
            self.cancel_wait();
            self.begin_wait();
            self.publish();
            return;
        }

        self.cancel_wait();
        match WatchSession::attach(&self.ctx, Arc::clone(&self.store), found.container).await {
            Ok(session) => {
                self.attaches += 1;
                self.phase = Phase::Attached(session);
            }
            Err(err) => {
                log_error!("failed to attach to feed container, retrying on next tick: {err:?}");
            }
        }
        self.publish();
    }

    async fn detach(&mut self) {
        if let Phase::Attached(session) = std::mem::replace(&mut self.phase, Phase::Detached) {
            let id = session.id();
            match session.detach().await {
                Ok(()) => log_info!("session {id} detached"),
                Err(err) => log_error!("session {id} did not detach cleanly: {err:?}"),
            }
        }
    }

    /// Drops whatever is live: a pending wait or an attached session.
    async fn release(&mut self) {
        match self.phase {
            Phase::Waiting(_) => self.cancel_wait(),
            Phase::Attached(_) => self.detach().await,
            Phase::Detached => {}
        }
        self.publish();
    }

    fn publish(&self) {
        let status = CoordinatorStatus {
            phase: self.phase(),
            session_id: self.session().map(WatchSession::id),
            attaches: self.attaches,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut ticker = time::interval(self.ctx.config.route_tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    log_info!("lifecycle coordinator shutting down");
                    break;
                }
                Some(found) = self.found_rx.recv() => self.handle_found(found).await,
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.release().await;
    }

    pub fn spawn(self) -> CoordinatorHandle {
        let cancel_token = CancellationToken::new();
        let status = self.subscribe();
        let handle = tokio::spawn(self.run(cancel_token.clone()));

        CoordinatorHandle {
            handle: Some(handle),
            cancel_token,
            status,
        }
    }
}

/// Polls for the feed container until it appears or the wait is cancelled.
/// No timeout: the feed may take arbitrarily long to render.
async fn wait_for_container(
    dom: Arc<dyn FeedDom>,
    selector: String,
    poll_interval: Duration,
    generation: u64,
    found_tx: mpsc::UnboundedSender<ContainerFound>,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return,
            _ = ticker.tick() => {
                if let Some(container) = dom.query_first(None, &selector) {
                    let _ = found_tx.send(ContainerFound { generation, container });
                    return;
                }
            }
        }
    }
}

pub struct CoordinatorHandle {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    status: watch::Receiver<CoordinatorStatus>,
}

impl CoordinatorHandle {
    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Cancels the loop, tears down any live session and waits for both.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel_token.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .await
                .context("lifecycle coordinator task failed to join"),
            None => Ok(()),
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::dom::MemoryDom;
    use crate::filter::SignatureClassifier;
    use crate::store::MemoryStore;

    const COLUMN: (&str, &str) = ("data-testid", "primaryColumn");

    fn coordinator() -> (Arc<MemoryDom>, LifecycleCoordinator) {
        let config = FilterConfig::default();
        let dom = Arc::new(MemoryDom::new());
        let ctx = FilterContext::new(
            dom.clone(),
            Arc::new(SignatureClassifier::from_config(&config)),
            Arc::new(config),
        );
        let coordinator = LifecycleCoordinator::new(ctx, Arc::new(MemoryStore::new()), dom.clone());
        (dom, coordinator)
    }

    async fn next_found(coordinator: &mut LifecycleCoordinator) {
        let found = coordinator.found_rx.recv().await.unwrap();
        coordinator.handle_found(found).await;
    }

    fn bars(dom: &MemoryDom) -> usize {
        dom.count_matching(r#"div[id="my-tweaks-bar"]"#)
    }

    #[tokio::test(start_paused = true)]
    async fn attaches_once_container_appears() {
        let (dom, mut coordinator) = coordinator();
        dom.navigate("/notifications");

        coordinator.tick().await;
        assert_eq!(coordinator.phase(), PhaseKind::Waiting);

        time::sleep(Duration::from_secs(3)).await;
        dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        next_found(&mut coordinator).await;

        assert_eq!(coordinator.phase(), PhaseKind::Attached);
        assert_eq!(bars(&dom), 1);
        assert_eq!(dom.live_observers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_start_one_wait() {
        let (dom, mut coordinator) = coordinator();
        dom.navigate("/notifications");

        coordinator.tick().await;
        coordinator.tick().await;
        coordinator.tick().await;
        assert_eq!(coordinator.generation, 1);

        dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        next_found(&mut coordinator).await;
        coordinator.tick().await;

        assert_eq!(coordinator.phase(), PhaseKind::Attached);
        assert_eq!(bars(&dom), 1);
        assert_eq!(dom.live_observers(), 1);
        assert!(coordinator.found_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolving_after_route_change_is_discarded() {
        let (dom, mut coordinator) = coordinator();
        dom.navigate("/notifications");
        coordinator.tick().await;

        // The user leaves before the next tick, then the feed renders.
        dom.navigate("/home");
        dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        next_found(&mut coordinator).await;

        assert_eq!(coordinator.phase(), PhaseKind::Detached);
        assert_eq!(bars(&dom), 0);
        assert_eq!(dom.live_observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_ignored() {
        let (dom, mut coordinator) = coordinator();
        dom.navigate("/notifications");
        coordinator.tick().await;
        dom.navigate("/home");
        coordinator.tick().await;
        dom.navigate("/notifications");
        coordinator.tick().await;
        assert_eq!(coordinator.generation, 2);

        let column = dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        coordinator
            .handle_found(ContainerFound { generation: 1, container: column })
            .await;
        assert_eq!(coordinator.phase(), PhaseKind::Waiting);
        assert_eq!(bars(&dom), 0);

        next_found(&mut coordinator).await;
        assert_eq!(coordinator.phase(), PhaseKind::Attached);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_route_tears_session_down() {
        let (dom, mut coordinator) = coordinator();
        let mut status = coordinator.subscribe();
        dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        dom.navigate("/notifications");
        coordinator.tick().await;
        next_found(&mut coordinator).await;
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().phase, PhaseKind::Attached);

        dom.navigate("/home");
        coordinator.tick().await;

        assert_eq!(coordinator.phase(), PhaseKind::Detached);
        assert_eq!(bars(&dom), 0);
        assert_eq!(dom.live_observers(), 0);
        assert_eq!(status.borrow().session_id, None);
        assert_eq!(status.borrow().attaches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn re_attaches_when_host_drops_the_bar() {
        let (dom, mut coordinator) = coordinator();
        dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        dom.navigate("/notifications");
        coordinator.tick().await;
        next_found(&mut coordinator).await;
        let first = coordinator.session().map(WatchSession::id).unwrap();
        let bar = dom.query_first(None, r#"div[id="my-tweaks-bar"]"#).unwrap();

        dom.remove_element(bar);
        coordinator.tick().await;
        assert_eq!(coordinator.phase(), PhaseKind::Waiting);
        assert_eq!(dom.live_observers(), 0);

        next_found(&mut coordinator).await;
        let second = coordinator.session().map(WatchSession::id).unwrap();
        assert_ne!(first, second);
        assert_eq!(bars(&dom), 1);
        assert_eq!(dom.live_observers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn off_route_ticks_do_nothing() {
        let (dom, mut coordinator) = coordinator();
        dom.append_element(dom.document(), "div", &[COLUMN]).unwrap();
        dom.navigate("/explore");

        coordinator.tick().await;
        coordinator.tick().await;
        assert_eq!(coordinator.phase(), PhaseKind::Detached);
        assert_eq!(coordinator.generation, 0);
        assert_eq!(bars(&dom), 0);
    }
}
