//! Cluster pairing subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::action::{Action, ActionContext, EventHooks};
use crate::cluster::{Cluster, Outcome};
use crate::error::{Error, Result};
use crate::logging;

/// Credentials for the second cluster of a pair.
#[derive(Args, Debug, Clone, Default, Validate)]
pub struct PeerArgs {
    /// Management VIP of the second cluster
    #[arg(long)]
    #[validate(custom(function = "crate::validate::ipv4"))]
    pub mvip2: Option<String>,

    /// Admin user of the second cluster; the first cluster's when omitted
    #[arg(long)]
    pub user2: Option<String>,

    /// Admin password of the second cluster; the first cluster's when omitted
    #[arg(long)]
    pub pass2: Option<String>,
}

impl PeerArgs {
    fn connect(&self, ctx: &ActionContext) -> Result<Cluster> {
        let defaults = &ctx.config().cluster;
        ctx.peer(
            self.mvip2.as_deref(),
            self.user2.as_deref().unwrap_or(&defaults.username),
            self.pass2.as_deref().unwrap_or(&defaults.password),
        )
    }
}

/// Pair two clusters for replication
#[derive(Args, Debug, Clone, Validate)]
pub struct ClusterPairCreateArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub peer: PeerArgs,

    /// Fail if the clusters are already paired
    #[arg(long)]
    pub strict: bool,
}

#[async_trait]
impl Action for ClusterPairCreateArgs {
    const NAME: &'static str = "cluster-pair-create";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_PAIR", "AFTER_PAIR"]
    }

    fn check(&self) -> Result<()> {
        if self.peer.mvip2.is_none() {
            return Err(Error::argument("invalid value for mvip2 - must have a value"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let remote = self.peer.connect(ctx)?;
        hooks.raise("BEFORE_PAIR")?;
        let pair_id = match cluster.pair_with(&remote, self.strict).await? {
            Outcome::Changed(id) => {
                logging::pass(format!("Successfully paired {} with {}", cluster.mvip(), remote.mvip()));
                id
            }
            Outcome::Unchanged(id) => {
                logging::pass(format!("{} and {} are already paired", cluster.mvip(), remote.mvip()));
                id
            }
        };
        hooks.raise("AFTER_PAIR")?;
        Ok(json!({ "clusterPairID": pair_id }))
    }
}

/// Remove a cluster pair, from both sides when the second cluster is given
#[derive(Args, Debug, Clone, Validate)]
pub struct ClusterPairDeleteArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub peer: PeerArgs,

    /// Name of the paired cluster
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// UUID of the pair
    #[arg(long)]
    pub cluster_pair_uuid: Option<String>,

    /// ID of the pair
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub cluster_pair_id: Option<u64>,

    /// Fail if the pair does not exist
    #[arg(long)]
    pub strict: bool,
}

impl ClusterPairDeleteArgs {
    /// What to look the pair up by on the first cluster.
    fn key(&self) -> Result<String> {
        let keys: Vec<String> = [
            self.cluster_pair_id.map(|id| id.to_string()),
            self.cluster_pair_uuid.clone(),
            self.cluster_name.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        match (keys.as_slice(), &self.peer.mvip2) {
            ([key], _) => Ok(key.clone()),
            ([], Some(mvip2)) => Ok(mvip2.clone()),
            ([], None) => Err(Error::argument(
                "Please specify mvip2, cluster_name, cluster_pair_uuid or cluster_pair_id",
            )),
            _ => Err(Error::argument(
                "Please specify only one of cluster_name, cluster_pair_uuid or cluster_pair_id",
            )),
        }
    }
}

#[async_trait]
impl Action for ClusterPairDeleteArgs {
    const NAME: &'static str = "cluster-pair-delete";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_UNPAIR", "AFTER_UNPAIR"]
    }

    fn check(&self) -> Result<()> {
        self.key().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let key = self.key()?;
        hooks.raise("BEFORE_UNPAIR")?;
        match cluster.delete_pair(&key, self.strict).await? {
            Outcome::Changed(_) => logging::pass(format!("Successfully removed pair {} from {}", key, cluster.mvip())),
            Outcome::Unchanged(_) => logging::pass(format!("Pair {} does not exist on {}", key, cluster.mvip())),
        }

        if self.peer.mvip2.is_some() {
            let remote = self.peer.connect(ctx)?;
            info!("Removing the pair from {}", remote.mvip());
            if remote.delete_pair(cluster.mvip(), false).await?.changed() {
                logging::pass(format!("Successfully removed pair {} from {}", cluster.mvip(), remote.mvip()));
            }
        }
        hooks.raise("AFTER_UNPAIR")?;
        Ok(json!(true))
    }
}
