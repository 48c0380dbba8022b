//! Reading cluster state out of the event log and fault list.
//!
//! The event log is a rolling window, so nothing here assumes a pair of
//! events is complete: a start without its end means "still running or
//! fell off the log". Callers filter by the time they made a request, never
//! by absolute generation numbers.

pub mod gc;
pub mod sync;

pub use gc::GcInfo;
pub use sync::SyncKind;

use serde_json::Value;
use std::collections::BTreeSet;

use crate::api::types::RawEvent;
use crate::cluster::Cluster;
use crate::error::Result;
use crate::util::parse_timestamp;

/// One event with its time parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub id: u64,
    pub message: String,
    /// Epoch seconds, 0 when the cluster's stamp could not be parsed
    pub timestamp: i64,
    pub details: Value,
    pub service_id: u64,
    pub node_id: u64,
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        Self {
            id: raw.event_id,
            timestamp: parse_timestamp(&raw.time_of_report),
            message: raw.message,
            details: raw.details,
            service_id: raw.service_id,
            node_id: raw.node_id,
        }
    }
}

/// Events in chronological order. The cluster lists newest first.
pub fn chronological(raw: Vec<RawEvent>) -> Vec<Event> {
    let mut events: Vec<Event> = raw.into_iter().map(Event::from).collect();
    events.sort_by_key(|e| (e.timestamp, e.id));
    events
}

/// True if any event after `since` has `needle` in its message.
pub fn contains_event(events: &[Event], needle: &str, since: i64) -> bool {
    events
        .iter()
        .any(|e| e.timestamp > since && e.message.contains(needle))
}

/// Fault codes that are not on the allow list.
pub fn unexpected_faults(codes: &BTreeSet<String>, allowed: &[String]) -> BTreeSet<String> {
    codes
        .iter()
        .filter(|c| !allowed.iter().any(|a| a == *c))
        .cloned()
        .collect()
}

impl Cluster {
    pub async fn events(&self) -> Result<Vec<Event>> {
        Ok(chronological(self.api().list_events().await?))
    }

    /// Whether an event containing `needle` was logged after `since`.
    pub async fn check_for_event(&self, needle: &str, since: i64) -> Result<bool> {
        Ok(contains_event(&self.events().await?, needle, since))
    }

    /// Current faults minus the configured allow list.
    pub async fn unexpected_faults(&self) -> Result<BTreeSet<String>> {
        let codes = self.current_fault_codes().await?;
        Ok(unexpected_faults(&codes, &self.config().fault_whitelist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u64, message: &str, time: &str) -> RawEvent {
        RawEvent {
            event_id: id,
            message: message.into(),
            time_of_report: time.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_chronological_reverses_listing() {
        let events = chronological(vec![
            raw(3, "third", "2024-05-01T10:00:03Z"),
            raw(2, "second", "2024-05-01T10:00:02Z"),
            raw(1, "first", "2024-05-01T10:00:01Z"),
        ]);
        let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_contains_event_is_strictly_after() {
        let events = chronological(vec![raw(1, "Node 3 restarted", "2024-05-01T10:00:00Z")]);
        let at = events[0].timestamp;
        assert!(contains_event(&events, "restarted", at - 1));
        assert!(!contains_event(&events, "restarted", at));
        assert!(!contains_event(&events, "removed", at - 1));
    }

    #[test]
    fn test_unexpected_faults() {
        let codes: BTreeSet<String> = ["clusterFull", "driveFailed"].iter().map(|s| s.to_string()).collect();
        let left = unexpected_faults(&codes, &["clusterFull".to_string()]);
        assert_eq!(left.into_iter().collect::<Vec<_>>(), vec!["driveFailed".to_string()]);
    }
}
