//! The action framework every subcommand is built on.
//!
//! An action is an argument struct that knows how to validate itself and
//! how to run against a cluster. Mutations implement [`Action`] directly and
//! return `true` on success; read-only actions implement [`QueryAction`] and
//! get their display step for free. [`ActionRunner`] turns either into a
//! process exit code.

pub mod child;
pub mod hooks;
pub mod output;
pub mod result;
pub mod runner;

pub use child::{ChildAction, ChildOutcome};
pub use hooks::{EventCallback, EventHooks, FAILURE};
pub use output::OutputFormat;
pub use result::{publish, ResultListener};
pub use runner::{install_panic_hook, ActionRunner};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use validator::Validate;

use crate::cluster::Cluster;
use crate::config::Config;
use crate::error::{Error, Result};

/// Everything an action needs from its surroundings.
#[derive(Clone)]
pub struct ActionContext {
    config: Arc<Config>,
    pub format: OutputFormat,
    cluster: Option<Cluster>,
    peer: Option<Cluster>,
}

impl ActionContext {
    pub fn new(config: Arc<Config>, format: OutputFormat) -> Self {
        Self {
            config,
            format,
            cluster: None,
            peer: None,
        }
    }

    /// Use an already built cluster instead of the configured credentials.
    pub fn with_cluster(mut self, cluster: Cluster) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Use an already built cluster as the remote side of two-cluster actions.
    pub fn with_peer(mut self, peer: Cluster) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The cluster this action targets.
    pub fn cluster(&self) -> Result<Cluster> {
        if let Some(cluster) = &self.cluster {
            return Ok(cluster.clone());
        }
        let settings = &self.config.cluster;
        self.connect("mvip", settings.mvip.as_deref(), &settings.username, &settings.password)
    }

    /// The second cluster of a two-cluster action.
    pub fn peer(&self, mvip: Option<&str>, username: &str, password: &str) -> Result<Cluster> {
        if let Some(peer) = &self.peer {
            return Ok(peer.clone());
        }
        self.connect("mvip2", mvip, username, password)
    }

    fn connect(&self, field: &str, mvip: Option<&str>, username: &str, password: &str) -> Result<Cluster> {
        let mvip = mvip
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::argument(format!("invalid value for {} - must have a value", field)))?;
        crate::validate::ipv4(mvip).map_err(|e| {
            Error::argument(format!(
                "invalid value for {} - {}",
                field,
                e.message.as_deref().unwrap_or("not a valid address")
            ))
        })?;
        Cluster::connect(mvip, username, password, self.shared_config())
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("format", &self.format)
            .field("cluster", &self.cluster)
            .field("peer", &self.peer)
            .finish()
    }
}

/// A runnable unit of work.
#[async_trait]
pub trait Action: Validate + Send + Sync {
    /// Subcommand name
    const NAME: &'static str;

    /// Events this action may raise, besides [`FAILURE`].
    fn events(&self) -> &'static [&'static str] {
        &[]
    }

    /// Checks that span more than one field.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Do the work. The value is what gets published as the result;
    /// `false` means the action failed without an error to report.
    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value>;
}

/// A read-only action: fetch a value, then show it.
#[async_trait]
pub trait QueryAction: Send + Sync {
    type Output: Serialize + Send + Sync;

    async fn get(&self, ctx: &ActionContext) -> Result<Self::Output>;

    /// Log lines for human output.
    fn human(&self, output: &Self::Output) -> Vec<String>;

    /// Items joined for `--csv` and `--bash`.
    fn items(&self, output: &Self::Output) -> Vec<String>;

    /// `get` followed by the display step; returns the value as JSON.
    async fn get_and_show(&self, ctx: &ActionContext) -> Result<Value> {
        let output = self.get(ctx).await?;
        let value = serde_json::to_value(&output)?;
        output::show(ctx.format, &self.human(&output), &self.items(&output), &value);
        Ok(value)
    }
}
