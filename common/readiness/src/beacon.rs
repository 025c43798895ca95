//! Beacons: the tracked unit of readiness and the caller-supplied action behind it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;

/// Error type produced by a failing action. Anything convertible into a boxed
/// error is accepted: std errors, `String`, `&str`, `anyhow::Error`.
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Awaitable outcome of an action.
pub type ActionFuture = BoxFuture<'static, Result<(), ActionError>>;

/// One-shot listener fired when a beacon resolves or the manager becomes ready.
pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconStatus {
    /// Registered, never executed
    NotStarted,
    /// An attempt is in flight
    Pending,
    /// The last attempt succeeded
    Resolved,
    /// The last attempt failed, waiting for the error handler to retry (or not)
    Rejected,
}

impl BeaconStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeaconStatus::NotStarted => "not_started",
            BeaconStatus::Pending => "pending",
            BeaconStatus::Resolved => "resolved",
            BeaconStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BeaconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an action produced when invoked: either an already-settled result, or a
/// future the manager drives to completion without blocking other beacons.
pub enum Settlement {
    Settled(Result<(), ActionError>),
    Pending(ActionFuture),
}

impl fmt::Debug for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Settlement::Settled(result) => f.debug_tuple("Settled").field(result).finish(),
            Settlement::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A zero-argument unit of work bound to a beacon. Invoked once per attempt,
/// so it must be callable repeatedly (retries and subsequent runs).
#[derive(Clone)]
pub struct Action {
    invoke: Arc<dyn Fn() -> Settlement + Send + Sync + 'static>,
}

impl Action {
    /// Wraps a closure that decides per call whether it settles inline or not.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Settlement + Send + Sync + 'static,
    {
        Self {
            invoke: Arc::new(f),
        }
    }

    /// Synchronous action: its result is known as soon as it returns, so the beacon
    /// settles within the same `run` call.
    pub fn sync<F, E>(f: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<ActionError>,
    {
        Self::new(move || Settlement::Settled(f().map_err(Into::into)))
    }

    /// Asynchronous action: the returned future is spawned on the tokio runtime.
    pub fn future<F, Fut, E>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<ActionError>,
    {
        Self::new(move || Settlement::Pending(f().map(|r| r.map_err(Into::into)).boxed()))
    }

    /// Invokes the action, turning a panic into a settled failure.
    pub(crate) fn invoke(&self) -> Settlement {
        panic::catch_unwind(AssertUnwindSafe(|| (self.invoke)()))
            .unwrap_or_else(|payload| Settlement::Settled(Err(panic_reason(payload))))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action(..)")
    }
}

/// Extracts a readable reason from a panic payload.
pub(crate) fn panic_reason(payload: Box<dyn Any + Send>) -> ActionError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("action panicked: {message}").into()
}

pub(crate) struct Beacon {
    pub name: String,
    pub action: Action,
    pub status: BeaconStatus,
    pub callbacks: Vec<Callback>,
}

impl Beacon {
    pub fn new(name: String, action: Action) -> Self {
        Self {
            name,
            action,
            status: BeaconStatus::NotStarted,
            callbacks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names() {
        assert_eq!(BeaconStatus::NotStarted.to_string(), "not_started");
        assert_eq!(BeaconStatus::Pending.as_str(), "pending");
        assert_eq!(
            serde_json::to_value(BeaconStatus::Rejected).unwrap(),
            serde_json::json!("rejected")
        );
    }

    #[test]
    fn sync_action_settles_inline() {
        let ok = Action::sync(|| Ok::<(), String>(()));
        assert!(matches!(ok.invoke(), Settlement::Settled(Ok(()))));

        let failing = Action::sync(|| Err("nope"));
        match failing.invoke() {
            Settlement::Settled(Err(err)) => assert_eq!(err.to_string(), "nope"),
            other => panic!("unexpected settlement: {other:?}"),
        }
    }

    #[test]
    fn panicking_action_is_a_failure() {
        let action = Action::sync(|| -> Result<(), String> { panic!("boom") });
        match action.invoke() {
            Settlement::Settled(Err(err)) => assert_eq!(err.to_string(), "action panicked: boom"),
            other => panic!("unexpected settlement: {other:?}"),
        }
    }

    #[tokio::test]
    async fn future_action_is_pending() {
        let action = Action::future(|| async { Err::<(), _>(String::from("later")) });
        match action.invoke() {
            Settlement::Pending(fut) => assert_eq!(fut.await.unwrap_err().to_string(), "later"),
            other => panic!("unexpected settlement: {other:?}"),
        }
    }
}
