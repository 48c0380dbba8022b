//! Node subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};
use validator::Validate;

use crate::action::{Action, ActionContext, EventHooks, QueryAction};
use crate::api::types::PendingNode;
use crate::connection::ExecuteOptions;
use crate::error::{Error, Result};
use crate::logging;

/// List the nodes waiting to be added to the cluster
#[derive(Args, Debug, Clone, Validate)]
pub struct ListPendingNodesArgs {}

#[async_trait]
impl QueryAction for ListPendingNodesArgs {
    type Output = Vec<PendingNode>;

    async fn get(&self, ctx: &ActionContext) -> Result<Vec<PendingNode>> {
        ctx.cluster()?.list_pending_nodes().await
    }

    fn human(&self, output: &Vec<PendingNode>) -> Vec<String> {
        if output.is_empty() {
            return vec!["There are no pending nodes".to_string()];
        }
        output
            .iter()
            .map(|n| format!("  {} - {} ({})", n.mip, n.name, n.software_version))
            .collect()
    }

    fn items(&self, output: &Vec<PendingNode>) -> Vec<String> {
        output.iter().map(|n| n.mip.clone()).collect()
    }
}

#[async_trait]
impl Action for ListPendingNodesArgs {
    const NAME: &'static str = "list-pending-nodes";

    async fn execute(&self, ctx: &ActionContext, _hooks: &EventHooks) -> Result<Value> {
        self.get_and_show(ctx).await
    }
}

/// Run a shell command on a node over SSH
#[derive(Args, Debug, Clone, Validate)]
pub struct NodeExecArgs {
    /// Management IP of the node
    #[arg(long)]
    #[validate(custom(function = "crate::validate::ipv4"))]
    pub node_ip: String,

    /// Command to run
    #[arg(long)]
    #[validate(custom(function = "crate::validate::not_blank"))]
    pub command: String,

    /// How long to let the command run (seconds); the configured SSH timeout when omitted
    #[arg(long)]
    #[validate(range(min = 1))]
    pub timeout: Option<u64>,
}

#[async_trait]
impl Action for NodeExecArgs {
    const NAME: &'static str = "node-exec";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_EXEC", "AFTER_EXEC"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let node = cluster.node(&self.node_ip).await?;
        let timeout = self
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(ctx.config().ssh.command_timeout);

        hooks.raise("BEFORE_EXEC")?;
        let outcome = node
            .exec_with(&self.command, &ExecuteOptions::new().with_timeout(timeout))
            .await;
        if let Err(e) = node.close().await {
            debug!("Closing session to {}: {}", self.node_ip, e);
        }
        let result = outcome?;

        for line in result.stdout.lines() {
            logging::raw(line);
        }
        if !result.success {
            for line in result.stderr.lines() {
                error!("{}", line);
            }
            return Err(Error::other(format!(
                "Command exited with code {} on {}",
                result.exit_code, self.node_ip
            )));
        }
        logging::pass(format!("Successfully ran command on {}", self.node_ip));
        hooks.raise("AFTER_EXEC")?;
        Ok(json!({ "stdout": result.stdout, "exitCode": result.exit_code }))
    }
}
