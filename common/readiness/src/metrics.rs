pub(crate) const METRIC_BEACON_ATTEMPTS: &str = "readiness_beacon_attempts_total";
pub(crate) const METRIC_BEACON_FAILURES: &str = "readiness_beacon_failures_total";
pub(crate) const METRIC_BEACON_ATTEMPT_DURATION: &str =
    "readiness_beacon_attempt_duration_seconds";
pub(crate) const METRIC_BEACON_SLOW: &str = "readiness_beacon_slow_total";
pub(crate) const METRIC_READY: &str = "readiness_ready";
pub(crate) const METRIC_TIME_TO_READY: &str = "readiness_time_to_ready_seconds";

pub(crate) fn emit_beacon_attempt(manager: &str, beacon: &str) {
    metrics::counter!(
        METRIC_BEACON_ATTEMPTS,
        "manager" => manager.to_string(),
        "beacon" => beacon.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_beacon_failure(manager: &str, beacon: &str) {
    metrics::counter!(
        METRIC_BEACON_FAILURES,
        "manager" => manager.to_string(),
        "beacon" => beacon.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_beacon_attempt_duration(
    manager: &str,
    beacon: &str,
    result: &str,
    duration_secs: f64,
) {
    metrics::histogram!(
        METRIC_BEACON_ATTEMPT_DURATION,
        "manager" => manager.to_string(),
        "beacon" => beacon.to_string(),
        "result" => result.to_string()
    )
    .record(duration_secs);
}

pub(crate) fn emit_beacon_slow(manager: &str, beacon: &str) {
    metrics::counter!(
        METRIC_BEACON_SLOW,
        "manager" => manager.to_string(),
        "beacon" => beacon.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_ready(manager: &str, ready: bool) {
    let value = if ready { 1.0 } else { 0.0 };
    metrics::gauge!(METRIC_READY, "manager" => manager.to_string()).set(value);
}

pub(crate) fn emit_time_to_ready(manager: &str, duration_secs: f64) {
    metrics::histogram!(METRIC_TIME_TO_READY, "manager" => manager.to_string())
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;
    use crate::{Action, Manager};

    fn counter_total(snapshot: &[(String, u64)], name: &str) -> u64 {
        snapshot
            .iter()
            .filter(|(metric, _)| metric == name)
            .map(|(_, value)| value)
            .sum()
    }

    #[test]
    fn run_emits_beacon_counters() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let manager = Manager::builder("test")
                .with_error_handler(|_, _| {})
                .build();
            manager
                .register("ok", Action::sync(|| Ok::<(), String>(())))
                .unwrap();
            manager
                .register("down", Action::sync(|| Err("down")))
                .unwrap();
            manager.run();
        });

        let counters: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) => Some((key.key().name().to_string(), n)),
                _ => None,
            })
            .collect();

        assert_eq!(counter_total(&counters, METRIC_BEACON_ATTEMPTS), 2);
        assert_eq!(counter_total(&counters, METRIC_BEACON_FAILURES), 1);
        assert_eq!(counter_total(&counters, METRIC_BEACON_SLOW), 0);
    }
}
