pub mod coordinator;
pub mod session;

pub use coordinator::{CoordinatorHandle, CoordinatorStatus, LifecycleCoordinator, PhaseKind};
pub use session::{SessionInfo, WatchSession};
