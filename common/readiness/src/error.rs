//! Readiness error types.

use std::backtrace::Backtrace;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised synchronously by the registration APIs of [`Manager`](crate::Manager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    /// [`Manager::register`](crate::Manager::register) was called with a name already in use.
    #[error("beacon '{0}' already exists, please ensure to use a unique name per beacon")]
    DuplicateBeacon(String),

    /// [`Manager::on_action_ready`](crate::Manager::on_action_ready) was called for an
    /// unregistered name.
    #[error(
        "beacon '{0}' does not exist, make sure to call `register` before setting a beacon ready hook"
    )]
    UnknownBeacon(String),
}

/// A failed beacon attempt. Never returned from an API call: it is delivered to the
/// error handler registered with [`Manager::on_error`](crate::Manager::on_error),
/// exactly once per failed attempt.
#[derive(Debug, Clone, Error)]
#[error("Beacon execution failed: beacon '{name}', attempt {attempt}: {fail_reason}")]
pub struct ExecutionError {
    name: String,
    attempt: u32,
    fail_reason: String,
    trace: Arc<Backtrace>,
}

impl ExecutionError {
    pub const MESSAGE: &'static str = "Beacon execution failed";

    /// Captures the backtrace of the settling context, not of the action's own error.
    pub(crate) fn new(name: &str, attempt: u32, fail_reason: String) -> Self {
        Self {
            name: name.to_string(),
            attempt,
            fail_reason,
            trace: Arc::new(Backtrace::capture()),
        }
    }

    /// Name of the failing beacon.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempt number that failed, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Fixed human-readable message.
    pub fn message(&self) -> &'static str {
        Self::MESSAGE
    }

    /// Message of the action's original error.
    pub fn fail_reason(&self) -> &str {
        &self.fail_reason
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.trace
    }
}
