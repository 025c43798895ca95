//! K8s readiness probe handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, warn};

use crate::manager::Manager;
use crate::status::StatusReport;

/// Anything that can answer a readiness probe.
pub trait ReadinessSource: Send + Sync {
    fn is_ready(&self) -> bool;
    fn status(&self) -> StatusReport;
}

impl ReadinessSource for Manager {
    fn is_ready(&self) -> bool {
        Manager::is_ready(self)
    }

    fn status(&self) -> StatusReport {
        Manager::status(self)
    }
}

/// Readiness toggled by hand, with no beacons. Stands in for a [`Manager`] in tests
/// of code that only consumes the ready signal.
#[derive(Clone, Default)]
pub struct StaticReadiness {
    ready: Arc<AtomicBool>,
}

impl StaticReadiness {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl ReadinessSource for StaticReadiness {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn status(&self) -> StatusReport {
        StatusReport::default()
    }
}

/// Result of a probe: the aggregate flag plus each beacon's status, for display.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub beacons: StatusReport,
}

impl IntoResponse for ReadinessReport {
    /// 200 when ready, 503 otherwise; the JSON body lists beacons by status.
    fn into_response(self) -> Response {
        let code = match self.ready {
            true => StatusCode::OK,
            false => StatusCode::SERVICE_UNAVAILABLE,
        };
        (code, Json(self)).into_response()
    }
}

/// Axum-compatible readiness probe, e.g. `get(move || async move { handler.check() })`.
#[derive(Clone)]
pub struct ReadinessHandler {
    source: Arc<dyn ReadinessSource>,
}

impl ReadinessHandler {
    pub fn new<S>(source: S) -> Self
    where
        S: ReadinessSource + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    /// Snapshot of the source; no I/O.
    pub fn check(&self) -> ReadinessReport {
        let report = ReadinessReport {
            ready: self.source.is_ready(),
            beacons: self.source.status(),
        };
        match report.ready {
            true => debug!("readiness check ok"),
            false => warn!("readiness check failed: {:?}", report.beacons),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, BeaconStatus};

    #[test]
    fn static_source_toggles() {
        let source = StaticReadiness::new(false);
        let handler = ReadinessHandler::new(source.clone());
        assert!(!handler.check().ready);

        source.set_ready(true);
        let report = handler.check();
        assert!(report.ready);
        assert!(report.beacons.is_empty());
    }

    #[test]
    fn manager_source_reports_beacons() {
        let manager = Manager::default();
        manager
            .register("db", Action::sync(|| Ok::<(), String>(())))
            .unwrap();
        manager
            .register("cache", Action::sync(|| Err("down")))
            .unwrap();

        let handler = manager.readiness_handler();
        let before = handler.check();
        assert!(!before.ready);
        assert_eq!(
            before.beacons.get(BeaconStatus::NotStarted),
            Some(&["db".to_string(), "cache".to_string()][..])
        );

        manager.run();
        let after = handler.check();
        assert!(!after.ready);
        assert_eq!(
            serde_json::to_value(&after).unwrap(),
            serde_json::json!({
                "ready": false,
                "beacons": {"resolved": ["db"], "rejected": ["cache"]}
            })
        );
    }

    #[test]
    fn into_response() {
        let nok = ReadinessReport {
            ready: false,
            beacons: StatusReport::default(),
        }
        .into_response();
        assert_eq!(nok.status(), StatusCode::SERVICE_UNAVAILABLE);

        let ok = ReadinessReport {
            ready: true,
            beacons: StatusReport::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
