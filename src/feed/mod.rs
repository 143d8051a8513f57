pub mod control_bar;
pub mod watcher;

pub use control_bar::ControlBar;
pub use watcher::FeedWatcher;
