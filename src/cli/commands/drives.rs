//! Drive subcommands.

use async_trait::async_trait;
use clap::{Args, ValueEnum};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{error, info};
use validator::Validate;

use crate::action::{Action, ActionContext, EventHooks, QueryAction};
use crate::error::Result;
use crate::logging;

/// How an observed count is compared to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Compare {
    Lt,
    Le,
    Gt,
    Ge,
    #[default]
    Eq,
}

impl Compare {
    pub fn holds(&self, actual: usize, expected: usize) -> bool {
        match self {
            Compare::Lt => actual < expected,
            Compare::Le => actual <= expected,
            Compare::Gt => actual > expected,
            Compare::Ge => actual >= expected,
            Compare::Eq => actual == expected,
        }
    }
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compare::Lt => "<",
            Compare::Le => "<=",
            Compare::Gt => ">",
            Compare::Ge => ">=",
            Compare::Eq => "==",
        })
    }
}

/// Count the available drives, or check the count against an expected value
#[derive(Args, Debug, Clone, Validate)]
pub struct CountAvailableDrivesArgs {
    /// Only count drives in this node (management IP)
    #[arg(long)]
    #[validate(custom(function = "crate::validate::ipv4"))]
    pub node_ip: Option<String>,

    /// Expected number of drives; show the count when omitted
    #[arg(long)]
    pub expected: Option<usize>,

    /// How to compare the count to the expected number
    #[arg(long, value_enum, default_value = "eq")]
    pub compare: Compare,
}

#[async_trait]
impl QueryAction for CountAvailableDrivesArgs {
    type Output = usize;

    async fn get(&self, ctx: &ActionContext) -> Result<usize> {
        let cluster = ctx.cluster()?;
        let node_id = match &self.node_ip {
            Some(ip) => Some(cluster.find_node(ip).await?.node_id),
            None => None,
        };
        Ok(cluster.list_available_drives(node_id).await?.len())
    }

    fn human(&self, output: &usize) -> Vec<String> {
        vec![format!("{} available drives", output)]
    }

    fn items(&self, output: &usize) -> Vec<String> {
        vec![output.to_string()]
    }
}

#[async_trait]
impl Action for CountAvailableDrivesArgs {
    const NAME: &'static str = "count-available-drives";

    async fn execute(&self, ctx: &ActionContext, _hooks: &EventHooks) -> Result<Value> {
        let Some(expected) = self.expected else {
            return self.get_and_show(ctx).await;
        };
        let count = self.get(ctx).await?;
        if self.compare.holds(count, expected) {
            logging::pass(format!("Found {} available drives ({} {})", count, self.compare, expected));
            Ok(json!(true))
        } else {
            error!("Found {} available drives, expected {} {}", count, self.compare, expected);
            Ok(json!(false))
        }
    }
}

/// Add all available drives to the cluster
#[derive(Args, Debug, Clone, Validate)]
pub struct AddAvailableDrivesArgs {
    /// Do not wait for syncing after adding the drives
    #[arg(long)]
    pub no_sync: bool,
}

#[async_trait]
impl Action for AddAvailableDrivesArgs {
    const NAME: &'static str = "add-available-drives";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_ADD", "AFTER_ADD"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_ADD")?;
        let added = cluster.add_available_drives(!self.no_sync).await?;
        if added > 0 {
            logging::pass(format!("Successfully added {} drives", added));
        } else {
            logging::pass("No drives needed to be added");
        }
        hooks.raise("AFTER_ADD")?;
        Ok(json!({ "added": added }))
    }
}

/// Wait until every expected drive is present and healthy
#[derive(Args, Debug, Clone, Validate)]
pub struct WaitForHealthyDrivesArgs {
    /// How long to wait before giving up (seconds)
    #[arg(long, default_value_t = 1800)]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

#[async_trait]
impl Action for WaitForHealthyDrivesArgs {
    const NAME: &'static str = "wait-for-healthy-drives";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_WAIT", "DRIVES_HEALTHY"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_WAIT")?;
        let count = cluster
            .wait_for_healthy_drives(Duration::from_secs(self.timeout))
            .await?;
        info!("{} drives are active", count);
        logging::pass("All drives are healthy");
        hooks.raise("DRIVES_HEALTHY")?;
        Ok(json!(true))
    }
}
