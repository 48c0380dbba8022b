//! Bin and slice data-sync detection.
//!
//! A cluster is syncing when either its report pages show assignments in
//! flux or a sync-related fault is open.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::ApiVersion;
use crate::cluster::Cluster;
use crate::error::Result;
use crate::retry::{poll_until, PollSpec};

/// Faults that mean block data is being resynced.
pub const BIN_SYNC_FAULTS: &[&str] = &["blockServiceUnhealthy"];
/// Faults that mean metadata is being resynced.
pub const SLICE_SYNC_FAULTS: &[&str] = &["sliceServiceUnhealthy", "volumesDegraded"];

/// Which kind of data sync to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncKind {
    Bin,
    Slice,
}

impl SyncKind {
    fn label(&self) -> &'static str {
        match self {
            SyncKind::Bin => "bin sync",
            SyncKind::Slice => "slice sync",
        }
    }

    fn faults(&self) -> &'static [&'static str] {
        match self {
            SyncKind::Bin => BIN_SYNC_FAULTS,
            SyncKind::Slice => SLICE_SYNC_FAULTS,
        }
    }
}

/// Older clusters render an HTML table only while something is syncing.
pub fn html_report_syncing(body: &str) -> bool {
    body.contains("<table>")
}

/// `bins.json`: any service not `bsActive` is still receiving data.
pub fn bins_report_syncing(report: &Value) -> bool {
    report.as_array().is_some_and(|bins| {
        bins.iter().any(|bin| {
            bin.get("services")
                .and_then(Value::as_array)
                .is_some_and(|services| {
                    services
                        .iter()
                        .any(|s| s.get("status").and_then(Value::as_str) != Some("bsActive"))
                })
        })
    })
}

/// `slices.json`: unhealthy services, or slices without exactly one live
/// secondary, or with dead secondaries.
pub fn slices_report_syncing(report: &Value) -> bool {
    let services_unhealthy = report
        .get("services")
        .and_then(Value::as_array)
        .is_some_and(|services| {
            services
                .iter()
                .any(|s| s.get("health").and_then(Value::as_str) != Some("good"))
        });
    if services_unhealthy {
        return true;
    }

    let slices = report
        .get("slices")
        .or_else(|| report.get("slice"))
        .and_then(Value::as_array);
    slices.is_some_and(|slices| {
        slices.iter().any(|slice| {
            let live = slice.get("liveSecondaries").and_then(Value::as_array);
            let dead = slice
                .get("deadSecondaries")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            !matches!(live, Some(live) if live.len() == 1) || dead > 0
        })
    })
}

impl Cluster {
    async fn report_syncing(&self, kind: SyncKind) -> Result<bool> {
        let (json_report, html_report) = match kind {
            SyncKind::Bin => ("bins.json", "binsyncing"),
            SyncKind::Slice => ("slices.json", "slicesyncing"),
        };
        if self.api_version().await? >= ApiVersion::V5_0 {
            let report: Value = serde_json::from_str(&self.api().fetch_report(json_report).await?)?;
            Ok(match kind {
                SyncKind::Bin => bins_report_syncing(&report),
                SyncKind::Slice => slices_report_syncing(&report),
            })
        } else {
            Ok(html_report_syncing(&self.api().fetch_report(html_report).await?))
        }
    }

    pub async fn is_syncing(&self, kind: SyncKind) -> Result<bool> {
        if self.report_syncing(kind).await? {
            debug!("{} in progress per cluster report", kind.label());
            return Ok(true);
        }
        let faults = self.current_fault_codes().await?;
        let syncing = kind.faults().iter().any(|f| faults.contains(*f));
        if syncing {
            debug!("{} in progress per cluster faults", kind.label());
        }
        Ok(syncing)
    }

    pub async fn is_bin_syncing(&self) -> Result<bool> {
        self.is_syncing(SyncKind::Bin).await
    }

    pub async fn is_slice_syncing(&self) -> Result<bool> {
        self.is_syncing(SyncKind::Slice).await
    }

    /// Poll until the given kind of sync is no longer running.
    pub async fn wait_for_sync(&self, kind: SyncKind, timeout: Duration) -> Result<()> {
        info!("Waiting for {} to finish", kind.label());
        let spec = PollSpec::new(self.poll().sync_interval, timeout);
        poll_until(kind.label(), spec, || async move {
            Ok((!self.is_syncing(kind).await?).then_some(()))
        })
        .await?;
        info!("{} finished", kind.label());
        Ok(())
    }
}
