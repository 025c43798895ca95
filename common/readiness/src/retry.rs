use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Weak;

use tracing::debug;

use crate::manager::{Manager, Shared};

thread_local! {
    /// Retries requested on this thread while it is already executing one. `None`
    /// when no retry is in progress on the thread.
    static DEFERRED: RefCell<Option<VecDeque<(Manager, String, u32)>>> =
        const { RefCell::new(None) };
}

/// Ends the retry loop on this thread, even if a callback unwinds through it.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DEFERRED.with(|deferred| *deferred.borrow_mut() = None);
    }
}

/// Re-runs one beacon's execution with the next attempt number. Handed to the
/// error handler alongside each [`ExecutionError`](crate::ExecutionError); it can be
/// stored, cloned and invoked later, any number of times. Holds the manager weakly,
/// so a handler keeping tokens around does not keep the manager alive.
#[derive(Clone)]
pub struct Retry {
    manager: Weak<Shared>,
    beacon: String,
    attempt: u32,
}

impl Retry {
    pub(crate) fn new(manager: Weak<Shared>, beacon: &str, attempt: u32) -> Self {
        Self {
            manager,
            beacon: beacon.to_string(),
            attempt,
        }
    }

    /// Name of the beacon this token re-runs.
    pub fn beacon(&self) -> &str {
        &self.beacon
    }

    /// Attempt number the next execution will carry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Re-executes the beacon. A synchronous action settles before this returns.
    ///
    /// Calling `retry` from an error handler that is itself running inside a retry
    /// queues the attempt on this thread instead of nesting it, so a handler that
    /// retries forever loops without growing the stack.
    pub fn retry(&self) {
        let Some(shared) = self.manager.upgrade() else {
            debug!(
                beacon = %self.beacon,
                attempt = self.attempt,
                "Readiness: retry ignored, manager dropped"
            );
            return;
        };
        let manager = Manager::from_shared(shared);

        let queued = DEFERRED.with(|deferred| match deferred.borrow_mut().as_mut() {
            Some(queue) => {
                queue.push_back((manager.clone(), self.beacon.clone(), self.attempt));
                true
            }
            None => false,
        });
        if queued {
            return;
        }

        DEFERRED.with(|deferred| *deferred.borrow_mut() = Some(VecDeque::new()));
        let _guard = DrainGuard;
        let mut next = Some((manager, self.beacon.clone(), self.attempt));
        while let Some((manager, beacon, attempt)) = next {
            manager.retry_beacon(&beacon, attempt);
            next = DEFERRED.with(|deferred| {
                deferred
                    .borrow_mut()
                    .as_mut()
                    .and_then(VecDeque::pop_front)
            });
        }
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("beacon", &self.beacon)
            .field("attempt", &self.attempt)
            .finish()
    }
}
