//! Readiness manager: beacon registry, execution/retry state machine, status
//! propagation and the callback notification protocol.

use std::collections::HashMap;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime;
use tracing::{debug, info, warn};

use crate::beacon::{
    panic_reason, Action, ActionError, ActionFuture, Beacon, BeaconStatus, Callback, Settlement,
};
use crate::error::{ExecutionError, ReadinessError};
use crate::metrics;
use crate::probe::ReadinessHandler;
use crate::retry::Retry;
use crate::status::StatusReport;

pub(crate) type ErrorHandler = Arc<dyn Fn(ExecutionError, Retry) + Send + Sync + 'static>;

/// Options for creating a readiness manager.
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// Used to label logs and metrics.
    pub name: String,
    /// Warn (once per attempt) about awaitable actions still pending after this long.
    /// Only observes: nothing is cancelled.
    pub slow_beacon_threshold: Option<Duration>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            name: "readiness".to_string(),
            slow_beacon_threshold: Some(Duration::from_secs(30)),
        }
    }
}

/// Builder for [`Manager`]; start with [`Manager::builder`].
pub struct ManagerBuilder {
    options: ManagerOptions,
    error_handler: Option<ErrorHandler>,
}

impl ManagerBuilder {
    pub fn with_slow_beacon_threshold<D>(mut self, d: D) -> Self
    where
        D: TryInto<Duration>,
    {
        self.options.slow_beacon_threshold = d.try_into().ok();
        self
    }

    pub fn without_slow_beacon_warning(mut self) -> Self {
        self.options.slow_beacon_threshold = None;
        self
    }

    /// Installs the initial error handler, same as calling [`Manager::on_error`] after build.
    pub fn with_error_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(ExecutionError, Retry) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Manager {
        let manager = Manager::new(self.options);
        if let Some(handler) = self.error_handler {
            manager.lock().error_handler = handler;
        }
        manager
    }
}

pub(crate) struct Shared {
    name: String,
    slow_beacon_threshold: Option<Duration>,
    state: Mutex<State>,
}

struct State {
    beacons: Vec<Beacon>,
    index: HashMap<String, usize>,
    ready: bool,
    callbacks: Vec<Callback>,
    error_handler: ErrorHandler,
    run_started: Option<Instant>,
}

impl State {
    fn beacon_mut(&mut self, name: &str) -> Option<&mut Beacon> {
        let idx = *self.index.get(name)?;
        self.beacons.get_mut(idx)
    }

    fn beacon(&self, name: &str) -> Option<&Beacon> {
        self.beacons.get(*self.index.get(name)?)
    }
}

/// Tracks a set of named readiness checks and exposes a latched aggregate "ready"
/// signal. Clones share the same registry.
///
/// # Ready flag
///
/// `false` until every registered beacon is [`Resolved`](BeaconStatus::Resolved), then
/// latched `true` until the next [`run`](Manager::run), which resets it and re-executes
/// every beacon. An empty registry becomes ready as soon as it is run.
///
/// # Callbacks
///
/// Every callback fires at most once: callbacks registered before their condition
/// holds are queued and drained when it first becomes true, callbacks registered
/// afterwards fire immediately on the calling thread. Callbacks and the error handler
/// run with no internal lock held, so they may call back into the manager.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Shared>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(ManagerOptions::default())
    }
}

impl Manager {
    /// Create a new manager with the given options. The error handler defaults to
    /// logging the failure without retrying.
    pub fn new(options: ManagerOptions) -> Self {
        let manager_name = options.name.clone();
        let default_handler: ErrorHandler =
            Arc::new(move |error: ExecutionError, _retry: Retry| {
                warn!(
                    manager = %manager_name,
                    beacon = %error.name(),
                    attempt = error.attempt(),
                    reason = %error.fail_reason(),
                    "Readiness: beacon execution failed, not retrying"
                );
            });

        Self {
            inner: Arc::new(Shared {
                name: options.name,
                slow_beacon_threshold: options.slow_beacon_threshold,
                state: Mutex::new(State {
                    beacons: Vec::new(),
                    index: HashMap::new(),
                    ready: false,
                    callbacks: Vec::new(),
                    error_handler: default_handler,
                    run_started: None,
                }),
            }),
        }
    }

    pub fn builder(name: &str) -> ManagerBuilder {
        ManagerBuilder {
            options: ManagerOptions {
                name: name.to_string(),
                ..ManagerOptions::default()
            },
            error_handler: None,
        }
    }

    pub(crate) fn from_shared(inner: Arc<Shared>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True once every beacon resolved during the current run.
    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Current beacon names grouped by status.
    pub fn status(&self) -> StatusReport {
        StatusReport::from_beacons(&self.lock().beacons)
    }

    /// Registers `action` under `name`, in [`NotStarted`](BeaconStatus::NotStarted).
    ///
    /// Once the manager is ready this is a silent no-op: nothing would evaluate the
    /// new beacon until the next run.
    pub fn register(
        &self,
        name: impl Into<String>,
        action: Action,
    ) -> Result<(), ReadinessError> {
        let name = name.into();
        let mut state = self.lock();
        if state.ready {
            debug!(
                manager = %self.inner.name,
                beacon = %name,
                "Readiness: already ready, registration ignored"
            );
            return Ok(());
        }
        if state.index.contains_key(&name) {
            return Err(ReadinessError::DuplicateBeacon(name));
        }

        debug!(
            manager = %self.inner.name,
            beacon = %name,
            "Readiness: beacon registered"
        );
        let idx = state.beacons.len();
        state.index.insert(name.clone(), idx);
        state.beacons.push(Beacon::new(name, action));
        Ok(())
    }

    /// Resets the ready flag and starts executing every registered beacon without
    /// waiting on any of them. Synchronous actions settle before this returns;
    /// awaitable ones are spawned on the current tokio runtime.
    ///
    /// Every beacon is marked pending before the first one executes, so a beacon
    /// settling inline never sees its siblings' results from the previous run.
    pub fn run(&self) -> &Self {
        let beacons: Vec<(String, Action)> = {
            let mut state = self.lock();
            state.ready = false;
            state.run_started = Some(Instant::now());
            state
                .beacons
                .iter_mut()
                .map(|b| {
                    b.status = BeaconStatus::Pending;
                    (b.name.clone(), b.action.clone())
                })
                .collect()
        };
        metrics::emit_ready(&self.inner.name, false);
        info!(
            manager = %self.inner.name,
            beacons = beacons.len(),
            "Readiness: run started"
        );

        if beacons.is_empty() {
            self.track_readiness();
        }
        for (name, action) in beacons {
            self.execute(name, action, 1);
        }
        self
    }

    /// Fires `callback` once the manager becomes ready, or right away if it already is.
    pub fn on_ready<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.ready {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
        self
    }

    /// Fires `callback` once beacon `name` resolves, or right away if it already has.
    pub fn on_action_ready<F>(&self, name: &str, callback: F) -> Result<&Self, ReadinessError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        let Some(beacon) = state.beacon_mut(name) else {
            return Err(ReadinessError::UnknownBeacon(name.to_string()));
        };
        if beacon.status == BeaconStatus::Resolved {
            drop(state);
            callback();
        } else {
            beacon.callbacks.push(Box::new(callback));
        }
        Ok(self)
    }

    /// Replaces the error handler. Applies to every failure reported from now on,
    /// including retries of attempts that failed under the previous handler.
    pub fn on_error<H>(&self, handler: H) -> &Self
    where
        H: Fn(ExecutionError, Retry) + Send + Sync + 'static,
    {
        self.lock().error_handler = Arc::new(handler);
        self
    }

    /// Axum-compatible readiness probe backed by this manager.
    pub fn readiness_handler(&self) -> ReadinessHandler {
        ReadinessHandler::new(self.clone())
    }

    pub(crate) fn retry_beacon(&self, name: &str, attempt: u32) {
        let action = self.lock().beacon(name).map(|b| b.action.clone());
        match action {
            Some(action) => {
                debug!(
                    manager = %self.inner.name,
                    beacon = %name,
                    attempt,
                    "Readiness: retrying beacon"
                );
                self.execute(name.to_string(), action, attempt);
            }
            None => warn!(
                manager = %self.inner.name,
                beacon = %name,
                "Readiness: retry for unknown beacon"
            ),
        }
    }

    fn execute(&self, name: String, action: Action, attempt: u32) {
        self.update_beacon(&name, BeaconStatus::Pending);
        metrics::emit_beacon_attempt(&self.inner.name, &name);
        let started = Instant::now();

        match action.invoke() {
            Settlement::Settled(result) => self.settle(&name, attempt, started, result),
            Settlement::Pending(fut) => match runtime::Handle::try_current() {
                Ok(handle) => {
                    let manager = self.clone();
                    handle.spawn(async move {
                        let result = manager.drive(&name, fut).await;
                        manager.settle(&name, attempt, started, result);
                    });
                }
                Err(e) => self.settle(
                    &name,
                    attempt,
                    started,
                    Err(format!("no tokio runtime to drive the action: {e}").into()),
                ),
            },
        }
    }

    /// Awaits an action's future, converting a panic into a failure and reporting
    /// (without cancelling) attempts slower than the configured threshold.
    async fn drive(&self, name: &str, fut: ActionFuture) -> Result<(), ActionError> {
        let fut = AssertUnwindSafe(fut).catch_unwind();
        tokio::pin!(fut);

        let outcome = match self.inner.slow_beacon_threshold {
            Some(threshold) => match tokio::time::timeout(threshold, &mut fut).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    metrics::emit_beacon_slow(&self.inner.name, name);
                    warn!(
                        manager = %self.inner.name,
                        beacon = %name,
                        pending_secs = threshold.as_secs_f64(),
                        "Readiness: beacon still pending"
                    );
                    fut.await
                }
            },
            None => fut.await,
        };
        outcome.unwrap_or_else(|payload| Err(panic_reason(payload)))
    }

    fn settle(
        &self,
        name: &str,
        attempt: u32,
        started: Instant,
        result: Result<(), ActionError>,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                metrics::emit_beacon_attempt_duration(
                    &self.inner.name,
                    name,
                    "resolved",
                    elapsed,
                );
                self.update_beacon(name, BeaconStatus::Resolved);
            }
            Err(err) => {
                metrics::emit_beacon_attempt_duration(
                    &self.inner.name,
                    name,
                    "rejected",
                    elapsed,
                );
                metrics::emit_beacon_failure(&self.inner.name, name);
                self.update_beacon(name, BeaconStatus::Rejected);

                let error = ExecutionError::new(name, attempt, err.to_string());
                let retry = Retry::new(
                    Arc::downgrade(&self.inner),
                    name,
                    attempt.saturating_add(1),
                );
                let handler = self.lock().error_handler.clone();
                handler(error, retry);
            }
        }
    }

    /// Records a status transition, fires the beacon's queued callbacks when it
    /// resolves, then re-evaluates global readiness.
    fn update_beacon(&self, name: &str, status: BeaconStatus) {
        let fired = {
            let mut state = self.lock();
            let Some(beacon) = state.beacon_mut(name) else {
                warn!(
                    manager = %self.inner.name,
                    beacon = %name,
                    "Readiness: update for unknown beacon"
                );
                return;
            };
            beacon.status = status;
            if status == BeaconStatus::Resolved {
                mem::take(&mut beacon.callbacks)
            } else {
                Vec::new()
            }
        };
        debug!(
            manager = %self.inner.name,
            beacon = %name,
            %status,
            "Readiness: beacon updated"
        );

        for callback in fired {
            callback();
        }
        self.track_readiness();
    }

    fn track_readiness(&self) {
        let (fired, run_started) = {
            let mut state = self.lock();
            if state.ready {
                return;
            }
            state.ready = state
                .beacons
                .iter()
                .all(|b| b.status == BeaconStatus::Resolved);
            if !state.ready {
                return;
            }
            (mem::take(&mut state.callbacks), state.run_started)
        };

        metrics::emit_ready(&self.inner.name, true);
        let elapsed = run_started.map(|t| t.elapsed().as_secs_f64());
        if let Some(secs) = elapsed {
            metrics::emit_time_to_ready(&self.inner.name, secs);
        }
        info!(
            manager = %self.inner.name,
            elapsed_secs = elapsed,
            "Readiness: all beacons resolved, ready"
        );

        for callback in fired {
            callback();
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so the state is consistent even after a panic.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
