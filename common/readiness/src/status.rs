use std::collections::BTreeMap;

use serde::Serialize;

use crate::beacon::{Beacon, BeaconStatus};

/// Beacon names grouped by their current status. Statuses without members are
/// omitted; within a status, names keep their registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusReport(BTreeMap<BeaconStatus, Vec<String>>);

impl StatusReport {
    pub(crate) fn from_beacons<'a>(beacons: impl IntoIterator<Item = &'a Beacon>) -> Self {
        beacons
            .into_iter()
            .fold(Self::default(), |mut report, beacon| {
                report
                    .0
                    .entry(beacon.status)
                    .or_default()
                    .push(beacon.name.clone());
                report
            })
    }

    /// Names currently in `status`, or `None` when no beacon is.
    pub fn get(&self, status: BeaconStatus) -> Option<&[String]> {
        self.0.get(&status).map(Vec::as_slice)
    }

    /// Number of distinct statuses present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Statuses present, in lifecycle order, each with its members.
    pub fn iter(&self) -> impl Iterator<Item = (BeaconStatus, &[String])> {
        self.0.iter().map(|(status, names)| (*status, names.as_slice()))
    }

    pub fn into_inner(self) -> BTreeMap<BeaconStatus, Vec<String>> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::Action;

    fn beacon(name: &str, status: BeaconStatus) -> Beacon {
        let mut beacon = Beacon::new(name.to_string(), Action::sync(|| Ok::<(), String>(())));
        beacon.status = status;
        beacon
    }

    #[test]
    fn groups_by_status_in_registration_order() {
        let beacons = vec![
            beacon("b", BeaconStatus::Resolved),
            beacon("c", BeaconStatus::Rejected),
            beacon("a", BeaconStatus::Resolved),
        ];
        let report = StatusReport::from_beacons(&beacons);

        assert_eq!(report.len(), 2);
        assert_eq!(
            report.get(BeaconStatus::Resolved),
            Some(&["b".to_string(), "a".to_string()][..])
        );
        assert_eq!(report.get(BeaconStatus::Rejected), Some(&["c".to_string()][..]));
        assert_eq!(report.get(BeaconStatus::Pending), None);
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"resolved": ["b", "a"], "rejected": ["c"]})
        );
    }

    #[test]
    fn empty_registry_is_empty_report() {
        let report = StatusReport::from_beacons(&Vec::new());
        assert!(report.is_empty());
        assert_eq!(serde_json::to_value(&report).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn iterates_in_lifecycle_order() {
        let beacons = vec![
            beacon("down", BeaconStatus::Rejected),
            beacon("db", BeaconStatus::Resolved),
            beacon("new", BeaconStatus::NotStarted),
            beacon("cache", BeaconStatus::Pending),
        ];
        let report = StatusReport::from_beacons(&beacons);

        let seen: Vec<(BeaconStatus, Vec<String>)> = report
            .iter()
            .map(|(status, names)| (status, names.to_vec()))
            .collect();
        assert_eq!(
            seen,
            vec![
                (BeaconStatus::NotStarted, vec!["new".to_string()]),
                (BeaconStatus::Pending, vec!["cache".to_string()]),
                (BeaconStatus::Resolved, vec!["db".to_string()]),
                (BeaconStatus::Rejected, vec!["down".to_string()]),
            ]
        );
    }

    #[test]
    fn into_inner_keeps_groups() {
        let beacons = vec![
            beacon("a", BeaconStatus::Pending),
            beacon("b", BeaconStatus::Pending),
        ];
        let map = StatusReport::from_beacons(&beacons).into_inner();

        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(&BeaconStatus::Pending),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
    }
}
