//! Cluster-wide waits and checks.

use async_trait::async_trait;
use clap::{Args, ValueEnum};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::action::{Action, ActionContext, EventHooks};
use crate::error::{Error, Result};
use crate::events::SyncKind;
use crate::logging;
use crate::util::format::humanize_decimal;
use crate::util::{elapsed_str, parse_timestamp, timestamp_to_str};

/// A fullness level the cluster itself defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FullnessStage {
    /// Block fullness warning
    Stage2,
    /// Block fullness error
    Stage3,
}

/// Wait for the cluster to be at least as full as requested
#[derive(Args, Debug, Clone, Validate)]
pub struct WaitForClusterFullnessArgs {
    /// How full to wait for, in GB used
    #[arg(long)]
    pub full: Option<u64>,

    /// Wait for a cluster fullness threshold instead of a size
    #[arg(long, value_enum)]
    pub stage: Option<FullnessStage>,

    /// How long to wait before giving up (seconds)
    #[arg(long, default_value_t = 43200)]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

#[async_trait]
impl Action for WaitForClusterFullnessArgs {
    const NAME: &'static str = "wait-for-cluster-fullness";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_WAIT", "WAIT_TIMEOUT", "CLUSTER_FILLED"]
    }

    fn check(&self) -> Result<()> {
        match (self.full, self.stage) {
            (Some(_), Some(_)) => Err(Error::argument("Please specify either full or stage, not both")),
            (None, None) => Err(Error::argument("Please specify either full or stage")),
            _ => Ok(()),
        }
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let target = match (self.full, self.stage) {
            (Some(gb), _) => gb.saturating_mul(1000 * 1000 * 1000),
            (None, Some(stage)) => {
                let threshold = cluster.full_threshold().await?;
                let bytes = match stage {
                    FullnessStage::Stage2 => threshold.stage2_block_threshold_bytes,
                    FullnessStage::Stage3 => threshold.stage3_block_threshold_bytes,
                };
                if bytes == 0 {
                    return Err(Error::other("This cluster does not report fullness thresholds"));
                }
                bytes
            }
            (None, None) => return Err(Error::argument("Please specify either full or stage")),
        };

        info!(
            "Waiting for cluster at {} to be at least {}B used",
            cluster.mvip(),
            humanize_decimal(target as i64, 1, Some("G"))
        );
        let start = Instant::now();
        hooks.raise("BEFORE_WAIT")?;
        let used = match cluster.wait_for_fullness(target, Duration::from_secs(self.timeout)).await {
            Ok(used) => used,
            Err(Error::Timeout { .. }) => {
                error!("Timeout waiting for cluster fullness");
                hooks.raise("WAIT_TIMEOUT")?;
                return Ok(json!(false));
            }
            Err(e) => return Err(e),
        };

        info!("Finished waiting");
        info!("Cluster used space is {}B", humanize_decimal(used as i64, 1, Some("G")));
        info!("Duration {}", elapsed_str(start.elapsed()));
        logging::pass("Cluster is filled to specified level");
        hooks.raise("CLUSTER_FILLED")?;
        Ok(json!(true))
    }
}

fn event_time(value: &str) -> std::result::Result<(), ValidationError> {
    if value.parse::<i64>().is_ok() || parse_timestamp(value) > 0 {
        Ok(())
    } else {
        Err(ValidationError::new("timestamp").with_message(format!("'{}' is not a valid time", value).into()))
    }
}

/// Check whether an event has been logged since a point in time
#[derive(Args, Debug, Clone, Validate)]
pub struct CheckForEventArgs {
    /// Text to look for in event messages
    #[arg(long)]
    #[validate(custom(function = "crate::validate::not_blank"))]
    pub event: String,

    /// Only consider events after this time (epoch seconds or a cluster timestamp)
    #[arg(long, default_value = "0")]
    #[validate(custom(function = "event_time"))]
    pub since: String,
}

impl CheckForEventArgs {
    fn since_timestamp(&self) -> i64 {
        self.since.parse::<i64>().unwrap_or_else(|_| parse_timestamp(&self.since))
    }
}

#[async_trait]
impl Action for CheckForEventArgs {
    const NAME: &'static str = "check-for-event";

    async fn execute(&self, ctx: &ActionContext, _hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let since = self.since_timestamp();
        info!("Looking for '{}' in events since {}", self.event, timestamp_to_str(since));
        if cluster.check_for_event(&self.event, since).await? {
            logging::pass(format!("Found event '{}'", self.event));
            Ok(json!(true))
        } else {
            error!("Could not find event '{}'", self.event);
            Ok(json!(false))
        }
    }
}

/// Wait for bin and/or slice syncing to finish
#[derive(Args, Debug, Clone, Validate)]
pub struct WaitForSyncArgs {
    /// Which sync to wait for; both when omitted
    #[arg(long, value_enum)]
    pub kind: Option<SyncKind>,

    /// How long to wait before giving up (seconds); the configured sync timeout when omitted
    #[arg(long)]
    #[validate(range(min = 1))]
    pub timeout: Option<u64>,
}

#[async_trait]
impl Action for WaitForSyncArgs {
    const NAME: &'static str = "wait-for-sync";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_WAIT", "WAIT_TIMEOUT", "SYNC_FINISHED"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let timeout = self
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(ctx.config().poll.sync_timeout);
        let kinds = match self.kind {
            Some(kind) => vec![kind],
            None => vec![SyncKind::Slice, SyncKind::Bin],
        };

        let start = Instant::now();
        hooks.raise("BEFORE_WAIT")?;
        for kind in kinds {
            let remaining = timeout.saturating_sub(start.elapsed());
            match cluster.wait_for_sync(kind, remaining).await {
                Ok(()) => {}
                Err(e @ Error::Timeout { .. }) => {
                    error!("{}", e);
                    hooks.raise("WAIT_TIMEOUT")?;
                    return Ok(json!(false));
                }
                Err(e) => return Err(e),
            }
        }
        logging::pass(format!("Syncing finished after {}", elapsed_str(start.elapsed())));
        hooks.raise("SYNC_FINISHED")?;
        Ok(json!(true))
    }
}
