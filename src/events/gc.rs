//! Garbage-collection cycles reconstructed from the event log.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use super::Event;
use crate::cluster::{Cluster, Outcome};
use crate::error::Result;
use crate::retry::{poll_until, PollSpec};
use crate::util::time::now_timestamp;

/// Bytes per discarded block.
const BLOCK_BYTES: u64 = 4096;

/// A cycle with no end time that started longer ago than this is dead.
const IN_PROGRESS_WINDOW_SECS: i64 = 90 * 60;

static STARTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"GC generation:(\d+).+participatingSServices=\{(.*)\}.+eligibleBSs=\{(.*)\}")
        .expect("valid GC started pattern")
});
static RESCHEDULED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"GC rescheduled:(\d+)").expect("valid GC rescheduled pattern"));

/// One garbage-collection generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcInfo {
    pub generation: u64,
    pub start_time: i64,
    /// 0 while the cycle is running
    pub end_time: i64,
    pub participating_ss: BTreeSet<u64>,
    pub eligible_bs: BTreeSet<u64>,
    pub completed_bs: BTreeSet<u64>,
    pub discarded_bytes: u64,
    pub rescheduled: bool,
}

impl GcInfo {
    /// The cycle ran, ended, and every eligible block service reported.
    pub fn is_complete(&self) -> bool {
        !self.rescheduled && self.end_time > 0 && self.eligible_bs.is_subset(&self.completed_bs)
    }

    pub fn duration_secs(&self) -> Option<i64> {
        (self.end_time > 0).then(|| self.end_time - self.start_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GcEvent {
    Started,
    Rescheduled,
    Completed,
}

/// Classify a log message; cluster versions decorate the bare event names.
fn gc_event(message: &str) -> Option<GcEvent> {
    if message.contains("GCStarted") {
        Some(GcEvent::Started)
    } else if message.contains("GCRescheduled") {
        Some(GcEvent::Rescheduled)
    } else if message.contains("GCCompleted") {
        Some(GcEvent::Completed)
    } else {
        None
    }
}

fn parse_id_set(text: &str) -> BTreeSet<u64> {
    text.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

fn value_id_set(value: Option<&Value>) -> BTreeSet<u64> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

/// Generation and participant sets from a `GCStarted` event.
fn parse_started(details: &Value) -> Option<(u64, BTreeSet<u64>, BTreeSet<u64>)> {
    match details {
        Value::String(text) => {
            let caps = STARTED_RE.captures(text)?;
            Some((caps[1].parse().ok()?, parse_id_set(&caps[2]), parse_id_set(&caps[3])))
        }
        Value::Object(map) => Some((
            map.get("generation")?.as_u64()?,
            value_id_set(map.get("participatingSS")),
            value_id_set(map.get("eligibleBS")),
        )),
        _ => None,
    }
}

fn parse_rescheduled(details: &Value) -> Option<u64> {
    match details {
        Value::String(text) => RESCHEDULED_RE.captures(text)?[1].parse().ok(),
        Value::Object(map) => map.get("generation")?.as_u64(),
        _ => None,
    }
}

/// Generation and discarded block count from a `GCCompleted` event.
fn parse_completed(details: &Value) -> Option<(u64, u64)> {
    match details {
        Value::String(text) => {
            let mut parts = text.split_whitespace();
            let generation = parts.next()?.parse().ok()?;
            let blocks = parts.next()?.parse().ok()?;
            Some((generation, blocks))
        }
        Value::Object(map) => Some((
            map.get("generation")?.as_u64()?,
            map.get("discardedBlocks").and_then(Value::as_u64).unwrap_or(0),
        )),
        _ => None,
    }
}

/// Rebuild every GC generation visible in `events` (chronological order).
///
/// The result is sorted by generation.
pub fn reconstruct(events: &[Event]) -> Vec<GcInfo> {
    let mut cycles: Vec<GcInfo> = Vec::new();

    for event in events {
        let Some(kind) = gc_event(&event.message) else {
            continue;
        };
        match kind {
            GcEvent::Started => {
                let Some((generation, participating, eligible)) = parse_started(&event.details) else {
                    debug!("Unparseable GCStarted event {}", event.id);
                    continue;
                };
                let index = match cycles.iter().position(|c| c.generation == generation) {
                    Some(index) => index,
                    None => {
                        cycles.push(GcInfo {
                            generation,
                            ..Default::default()
                        });
                        cycles.len() - 1
                    }
                };
                let cycle = &mut cycles[index];
                cycle.start_time = event.timestamp;
                cycle.participating_ss = participating;
                cycle.eligible_bs = eligible;
            }
            GcEvent::Rescheduled => {
                let Some(generation) = parse_rescheduled(&event.details) else {
                    debug!("Unparseable GCRescheduled event {}", event.id);
                    continue;
                };
                match cycles.iter_mut().find(|c| c.generation == generation) {
                    Some(cycle) => {
                        cycle.rescheduled = true;
                        cycle.end_time = event.timestamp;
                    }
                    None => cycles.push(GcInfo {
                        generation,
                        start_time: event.timestamp,
                        rescheduled: true,
                        ..Default::default()
                    }),
                }
            }
            GcEvent::Completed => {
                let Some((generation, blocks)) = parse_completed(&event.details) else {
                    debug!("Unparseable GCCompleted event {}", event.id);
                    continue;
                };
                let Some(cycle) = cycles.iter_mut().find(|c| c.generation == generation) else {
                    continue;
                };
                if !cycle.eligible_bs.is_empty() && !cycle.eligible_bs.contains(&event.service_id) {
                    debug!(
                        "Ignoring GCCompleted from service {} not eligible for generation {}",
                        event.service_id, generation
                    );
                    continue;
                }
                if cycle.eligible_bs.contains(&event.service_id) {
                    cycle.completed_bs.insert(event.service_id);
                }
                cycle.discarded_bytes += blocks * BLOCK_BYTES;
                cycle.end_time = cycle.end_time.max(event.timestamp);
            }
        }
    }

    cycles.sort_by_key(|c| c.generation);
    cycles
}

/// Whether the newest generation that ran is still running at `now`.
pub fn in_progress(cycles: &[GcInfo], now: i64) -> bool {
    let Some(latest) = cycles.iter().rev().find(|c| !c.rescheduled) else {
        return false;
    };
    latest.end_time <= 0 && now - latest.start_time < IN_PROGRESS_WINDOW_SECS
}

/// Newest generation that ran, if it has finished.
pub fn finished(cycles: &[GcInfo]) -> Option<&GcInfo> {
    cycles
        .iter()
        .rev()
        .find(|c| !c.rescheduled)
        .filter(|c| c.is_complete())
}

/// The generation started or rescheduled at or after `request_time`.
fn started_since(events: &[Event], request_time: i64) -> Option<u64> {
    events
        .iter()
        .filter(|e| e.timestamp >= request_time)
        .find_map(|e| match gc_event(&e.message)? {
            GcEvent::Started => parse_started(&e.details).map(|(generation, _, _)| generation),
            GcEvent::Rescheduled => parse_rescheduled(&e.details),
            GcEvent::Completed => None,
        })
}

impl Cluster {
    pub async fn all_gc_info(&self) -> Result<Vec<GcInfo>> {
        Ok(reconstruct(&self.events().await?))
    }

    /// The newest generation, or an empty record if the log has none.
    pub async fn last_gc_info(&self) -> Result<GcInfo> {
        Ok(self.all_gc_info().await?.pop().unwrap_or_default())
    }

    pub async fn is_gc_in_progress(&self) -> Result<bool> {
        Ok(in_progress(&self.all_gc_info().await?, now_timestamp()))
    }

    /// Start a GC cycle and wait for the cluster to acknowledge it.
    ///
    /// A cycle already in progress is left alone unless `force` is set.
    pub async fn start_gc(&self, force: bool) -> Result<Outcome<GcInfo>> {
        if !force {
            let cycles = self.all_gc_info().await?;
            if in_progress(&cycles, now_timestamp()) {
                info!("GC is already in progress");
                let running = cycles.into_iter().rev().find(|c| !c.rescheduled).unwrap_or_default();
                return Ok(Outcome::Unchanged(running));
            }
        }

        let request_time = now_timestamp();
        info!("Starting GC on {}", self.mvip());
        self.api().start_gc().await?;

        let spec = PollSpec::new(self.poll().gc_start_interval, self.poll().gc_start_timeout);
        let generation = poll_until("GC to start", spec, || async move {
            Ok(started_since(&self.events().await?, request_time))
        })
        .await?;

        let info = self
            .all_gc_info()
            .await?
            .into_iter()
            .find(|c| c.generation == generation)
            .unwrap_or(GcInfo {
                generation,
                ..Default::default()
            });
        if info.rescheduled {
            info!("GC generation {} was rescheduled", generation);
        } else {
            info!("GC generation {} started", generation);
        }
        Ok(Outcome::Changed(info))
    }

    /// Wait for the newest generation that ran to finish on every block service.
    pub async fn wait_for_gc(&self, timeout: Duration) -> Result<GcInfo> {
        let spec = PollSpec::new(self.poll().gc_interval, timeout);
        poll_until("GC to finish", spec, || async move {
            let cycles = self.all_gc_info().await?;
            if let Some(latest) = cycles.iter().rev().find(|c| !c.rescheduled) {
                debug!(
                    "GC generation {}: {} of {} block services done",
                    latest.generation,
                    latest.completed_bs.intersection(&latest.eligible_bs).count(),
                    latest.eligible_bs.len()
                );
            }
            Ok(finished(&cycles).cloned())
        })
        .await
    }
}
