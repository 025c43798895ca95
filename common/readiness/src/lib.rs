//! Process readiness tracking: named asynchronous preconditions ("beacons") are
//! registered with a [`Manager`], executed concurrently on [`Manager::run`], and
//! folded into a single latched "ready" signal. Per-beacon and global callbacks
//! fire once when their condition becomes true; failed attempts are handed to a
//! pluggable error handler together with a [`Retry`] token, so retry policy stays
//! with the caller.

mod beacon;
mod error;
mod manager;
mod metrics;
mod probe;
mod retry;
mod status;

pub use beacon::{Action, ActionError, ActionFuture, BeaconStatus, Settlement};
pub use error::{ExecutionError, ReadinessError};
pub use manager::{Manager, ManagerBuilder, ManagerOptions};
pub use probe::{ReadinessHandler, ReadinessReport, ReadinessSource, StaticReadiness};
pub use retry::Retry;
pub use status::StatusReport;
