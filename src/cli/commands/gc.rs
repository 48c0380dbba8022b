//! Garbage collection subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;
use validator::Validate;

use crate::action::{Action, ActionContext, EventHooks, QueryAction};
use crate::cluster::Outcome;
use crate::error::Result;
use crate::events::GcInfo;
use crate::logging;
use crate::util::format::humanize_bytes;
use crate::util::{seconds_to_elapsed_str, timestamp_to_str};

/// Start a GC cycle
#[derive(Args, Debug, Clone, Validate)]
pub struct ClusterStartGcArgs {
    /// Start a new cycle even if one is already running
    #[arg(long)]
    pub force: bool,
}

#[async_trait]
impl Action for ClusterStartGcArgs {
    const NAME: &'static str = "cluster-start-gc";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_START_GC", "AFTER_START_GC"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_START_GC")?;
        let info = match cluster.start_gc(self.force).await? {
            Outcome::Changed(info) if info.rescheduled => {
                logging::pass(format!("GC generation {} was rescheduled by the cluster", info.generation));
                info
            }
            Outcome::Changed(info) => {
                logging::pass(format!("Started GC generation {}", info.generation));
                info
            }
            Outcome::Unchanged(info) => {
                logging::pass(format!("GC generation {} is already running", info.generation));
                info
            }
        };
        hooks.raise("AFTER_START_GC")?;
        Ok(json!({ "generation": info.generation }))
    }
}

/// Wait for the current GC cycle to finish
#[derive(Args, Debug, Clone, Validate)]
pub struct WaitForGcArgs {
    /// How long to wait before giving up (seconds)
    #[arg(long, default_value_t = 3600)]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

#[async_trait]
impl Action for WaitForGcArgs {
    const NAME: &'static str = "wait-for-gc";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_WAIT", "GC_FINISHED"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_WAIT")?;
        info!("Waiting for GC to finish on {}", cluster.mvip());
        let info = cluster.wait_for_gc(Duration::from_secs(self.timeout)).await?;
        for line in describe(&info) {
            info!("  {}", line);
        }
        logging::pass(format!("GC generation {} finished", info.generation));
        hooks.raise("GC_FINISHED")?;
        Ok(serde_json::to_value(&info)?)
    }
}

fn describe(info: &GcInfo) -> Vec<String> {
    let mut lines = vec![format!("Generation {}", info.generation)];
    if info.rescheduled {
        lines.push("Rescheduled".to_string());
        return lines;
    }
    lines.push(format!("Started {}", timestamp_to_str(info.start_time)));
    match info.duration_secs() {
        Some(seconds) => {
            lines.push(format!("Finished {}", timestamp_to_str(info.end_time)));
            lines.push(format!("Duration {}", seconds_to_elapsed_str(seconds.max(0) as u64)));
        }
        None => lines.push("In progress".to_string()),
    }
    lines.push(format!(
        "{} of {} block services done",
        info.completed_bs.intersection(&info.eligible_bs).count(),
        info.eligible_bs.len()
    ));
    lines.push(format!("Discarded {}", humanize_bytes(info.discarded_bytes, 1, None)));
    lines
}

/// Show the most recent GC cycle
#[derive(Args, Debug, Clone, Validate)]
pub struct ShowLastGcArgs {}

#[async_trait]
impl QueryAction for ShowLastGcArgs {
    type Output = GcInfo;

    async fn get(&self, ctx: &ActionContext) -> Result<GcInfo> {
        ctx.cluster()?.last_gc_info().await
    }

    fn human(&self, output: &GcInfo) -> Vec<String> {
        if output.generation == 0 {
            return vec!["No GC has been recorded on this cluster".to_string()];
        }
        describe(output)
    }

    fn items(&self, output: &GcInfo) -> Vec<String> {
        vec![
            output.generation.to_string(),
            output.start_time.to_string(),
            output.end_time.to_string(),
            output.discarded_bytes.to_string(),
        ]
    }
}

#[async_trait]
impl Action for ShowLastGcArgs {
    const NAME: &'static str = "show-last-gc";

    async fn execute(&self, ctx: &ActionContext, _hooks: &EventHooks) -> Result<Value> {
        self.get_and_show(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let info = GcInfo {
            generation: 7,
            start_time: 1000,
            end_time: 1090,
            eligible_bs: [1, 2].into_iter().collect(),
            completed_bs: [1, 2].into_iter().collect(),
            discarded_bytes: 4096,
            ..Default::default()
        };
        let lines = describe(&info);
        assert_eq!(lines[0], "Generation 7");
        assert!(lines.iter().any(|l| l == "2 of 2 block services done"));
        assert!(lines.iter().any(|l| l.starts_with("Duration")));

        let rescheduled = GcInfo {
            generation: 8,
            rescheduled: true,
            ..Default::default()
        };
        assert_eq!(describe(&rescheduled), vec!["Generation 8", "Rescheduled"]);
    }

    #[test]
    fn test_items_for_machine_output() {
        let info = GcInfo {
            generation: 3,
            start_time: 10,
            end_time: 20,
            discarded_bytes: 5,
            ..Default::default()
        };
        assert_eq!(ShowLastGcArgs {}.items(&info), vec!["3", "10", "20", "5"]);
    }
}
