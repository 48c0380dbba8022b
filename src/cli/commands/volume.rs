//! Volume subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};
use validator::Validate;

use super::{optional_selector, pool_result, VolumeSelectArgs};
use crate::action::{Action, ActionContext, EventHooks};
use crate::api::client::{CloneRequest, NewVolume};
use crate::api::types::{Qos, VolumeAccess};
use crate::cluster::volume::size_in_bytes;
use crate::cluster::Outcome;
use crate::config::QosDefaults;
use crate::error::{Error, Result};
use crate::logging;
use crate::validate::{qos_order, NameOrId};

/// Optional QoS flags, filled in from the configured defaults.
#[derive(Args, Debug, Clone, Default, Validate)]
pub struct QosArgs {
    /// Minimum IOPS
    #[arg(long)]
    #[validate(custom(function = "crate::validate::min_iops"))]
    pub min_iops: Option<u64>,

    /// Maximum IOPS
    #[arg(long)]
    #[validate(custom(function = "crate::validate::max_iops"))]
    pub max_iops: Option<u64>,

    /// Burst IOPS
    #[arg(long)]
    #[validate(custom(function = "crate::validate::max_iops"))]
    pub burst_iops: Option<u64>,
}

impl QosArgs {
    pub fn is_empty(&self) -> bool {
        self.min_iops.is_none() && self.max_iops.is_none() && self.burst_iops.is_none()
    }

    pub fn resolve(&self, defaults: &QosDefaults) -> Result<Qos> {
        let qos = Qos {
            min_iops: self.min_iops.unwrap_or(defaults.min_iops),
            max_iops: self.max_iops.unwrap_or(defaults.max_iops),
            burst_iops: self.burst_iops.unwrap_or(defaults.burst_iops),
        };
        qos_order(qos.min_iops, qos.max_iops, qos.burst_iops)?;
        Ok(qos)
    }
}

fn account_selector(name: Option<&str>, id: Option<u64>) -> Result<NameOrId> {
    NameOrId::from_parts(name, id, "account")
}

/// Create one volume, or a numbered series of volumes
#[derive(Args, Debug, Clone, Validate)]
pub struct VolumeCreateArgs {
    /// Name of the volume when creating just one
    #[arg(long)]
    pub volume_name: Option<String>,

    /// Prefix for the names of the new volumes (prefix + %05d)
    #[arg(long)]
    pub volume_prefix: Option<String>,

    /// Number of volumes to create
    #[arg(long, default_value_t = 1)]
    #[validate(range(min = 1))]
    pub volume_count: usize,

    /// Number to start naming from
    #[arg(long, default_value_t = 1)]
    pub volume_start: usize,

    /// Volume size in GB
    #[arg(long)]
    #[validate(custom(function = "crate::validate::volume_size"))]
    pub volume_size: u64,

    /// Size is in GiB instead of GB
    #[arg(long)]
    pub gib: bool,

    /// Use 512 byte sector emulation
    #[arg(long)]
    pub enable512e: bool,

    #[command(flatten)]
    #[validate(nested)]
    pub qos: QosArgs,

    /// Account to own the volumes
    #[arg(long)]
    pub account_name: Option<String>,

    /// ID of the account to own the volumes
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub account_id: Option<u64>,

    /// Fail if a volume already exists
    #[arg(long)]
    pub strict: bool,
}

impl VolumeCreateArgs {
    /// Names of the volumes to create.
    pub fn names(&self) -> Result<Vec<String>> {
        match (&self.volume_name, &self.volume_prefix) {
            (Some(name), None) if self.volume_count == 1 => Ok(vec![name.clone()]),
            (Some(_), None) => Err(Error::argument("Use volume_prefix when creating more than one volume")),
            (None, Some(prefix)) => Ok((self.volume_start..self.volume_start + self.volume_count)
                .map(|n| format!("{}{:05}", prefix, n))
                .collect()),
            (Some(_), Some(_)) => Err(Error::argument("Please specify either volume_name or volume_prefix, not both")),
            (None, None) => Err(Error::argument("Please specify either volume_name or volume_prefix")),
        }
    }
}

#[async_trait]
impl Action for VolumeCreateArgs {
    const NAME: &'static str = "volume-create";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_CREATE", "AFTER_CREATE"]
    }

    fn check(&self) -> Result<()> {
        self.names()?;
        account_selector(self.account_name.as_deref(), self.account_id)?;
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let qos = self.qos.resolve(&ctx.config().qos)?;
        let names = self.names()?;
        let cluster = ctx.cluster()?;
        let account = cluster
            .find_account(&account_selector(self.account_name.as_deref(), self.account_id)?)
            .await?;
        let template = NewVolume {
            name: String::new(),
            total_size: size_in_bytes(self.volume_size, self.gib),
            account_id: account.account_id,
            enable512e: self.enable512e,
            qos,
        };

        hooks.raise("BEFORE_CREATE")?;
        let outcomes = cluster.create_volumes(&names, &template, self.strict).await?;
        let created = outcomes.iter().filter(|o| o.changed()).count();
        let ids: Vec<u64> = outcomes.into_iter().map(Outcome::into_inner).collect();
        if created < ids.len() {
            info!("{} volumes already existed", ids.len() - created);
        }
        logging::pass(format!("Successfully created {} volumes in account {}", created, account.username));
        hooks.raise("AFTER_CREATE")?;
        Ok(json!({ "volumeIDs": ids }))
    }
}

/// Delete volumes
#[derive(Args, Debug, Clone, Validate)]
pub struct VolumeDeleteArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub select: VolumeSelectArgs,

    /// Purge the volumes after deleting them
    #[arg(long)]
    pub purge: bool,
}

#[async_trait]
impl Action for VolumeDeleteArgs {
    const NAME: &'static str = "volume-delete";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_DELETE", "AFTER_DELETE"]
    }

    fn check(&self) -> Result<()> {
        self.select.to_search().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let volumes = cluster.search_volumes(&self.select.to_search()?).await?;
        hooks.raise("BEFORE_DELETE")?;
        cluster.delete_volumes(&volumes, self.purge).await?;
        let verb = if self.purge { "deleted and purged" } else { "deleted" };
        logging::pass(format!("Successfully {} {} volumes", verb, volumes.len()));
        hooks.raise("AFTER_DELETE")?;
        Ok(json!(true))
    }
}

/// Purge deleted volumes
#[derive(Args, Debug, Clone, Validate)]
pub struct VolumePurgeArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub select: VolumeSelectArgs,
}

#[async_trait]
impl Action for VolumePurgeArgs {
    const NAME: &'static str = "volume-purge";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_PURGE", "AFTER_PURGE"]
    }

    fn check(&self) -> Result<()> {
        self.select.to_search().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let mut search = self.select.to_search()?;
        search.deleted = true;
        let volumes = cluster.search_volumes(&search).await?;
        hooks.raise("BEFORE_PURGE")?;
        cluster.purge_volumes(&volumes).await?;
        logging::pass(format!("Successfully purged {} volumes", volumes.len()));
        hooks.raise("AFTER_PURGE")?;
        Ok(json!(true))
    }
}

/// Grow volumes to a new size
#[derive(Args, Debug, Clone, Validate)]
pub struct VolumeExtendArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub select: VolumeSelectArgs,

    /// New volume size in GB
    #[arg(long)]
    #[validate(custom(function = "crate::validate::volume_size"))]
    pub new_size: u64,

    /// Size is in GiB instead of GB
    #[arg(long)]
    pub gib: bool,
}

#[async_trait]
impl Action for VolumeExtendArgs {
    const NAME: &'static str = "volume-extend";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_EXTEND", "AFTER_EXTEND"]
    }

    fn check(&self) -> Result<()> {
        self.select.to_search().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let volumes = cluster.search_volumes(&self.select.to_search()?).await?;
        let new_size = size_in_bytes(self.new_size, self.gib);
        hooks.raise("BEFORE_EXTEND")?;
        info!("Extending {} volumes to {} bytes", volumes.len(), new_size);
        let report = cluster.extend_volumes(&volumes, new_size).await?;
        let result = pool_result(report, "extend", "extended");
        hooks.raise("AFTER_EXTEND")?;
        result
    }
}

/// Set the QoS of volumes
#[derive(Args, Debug, Clone, Validate)]
pub struct VolumeSetQosArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub select: VolumeSelectArgs,

    #[command(flatten)]
    #[validate(nested)]
    pub qos: QosArgs,
}

#[async_trait]
impl Action for VolumeSetQosArgs {
    const NAME: &'static str = "volume-set-qos";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_SET_QOS", "AFTER_SET_QOS"]
    }

    fn check(&self) -> Result<()> {
        if self.qos.is_empty() {
            return Err(Error::argument("Please specify at least one of min_iops, max_iops or burst_iops"));
        }
        self.select.to_search().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let qos = self.qos.resolve(&ctx.config().qos)?;
        let cluster = ctx.cluster()?;
        let volumes = cluster.search_volumes(&self.select.to_search()?).await?;
        hooks.raise("BEFORE_SET_QOS")?;
        info!(
            "Setting QoS to {}/{}/{} on {} volumes",
            qos.min_iops,
            qos.max_iops,
            qos.burst_iops,
            volumes.len()
        );
        let report = cluster.set_volume_qos(&volumes, qos).await?;
        let result = pool_result(report, "set QoS on", "set QoS on");
        hooks.raise("AFTER_SET_QOS")?;
        result
    }
}

/// Clone a volume and wait for the clone to finish
#[derive(Args, Debug, Clone, Validate)]
pub struct VolumeCloneArgs {
    /// Name of the volume to clone
    #[arg(long)]
    pub volume_name: Option<String>,

    /// ID of the volume to clone
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub volume_id: Option<u64>,

    /// Name of the new volume
    #[arg(long)]
    #[validate(custom(function = "crate::validate::not_blank"))]
    pub clone_name: String,

    /// Size of the clone in GB; the source size when omitted
    #[arg(long)]
    #[validate(custom(function = "crate::validate::volume_size"))]
    pub new_size: Option<u64>,

    /// Size is in GiB instead of GB
    #[arg(long)]
    pub gib: bool,

    /// Account to own the clone; the source owner when omitted
    #[arg(long)]
    pub dest_account: Option<String>,

    /// ID of the account to own the clone
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub dest_account_id: Option<u64>,

    /// Access mode of the clone
    #[arg(long, value_enum, default_value = "readWrite")]
    pub access: VolumeAccess,

    /// How long to wait for the clone to finish (seconds)
    #[arg(long, default_value_t = 300)]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

impl VolumeCloneArgs {
    fn source(&self) -> Result<NameOrId> {
        NameOrId::from_parts(self.volume_name.as_deref(), self.volume_id, "volume")
    }
}

#[async_trait]
impl Action for VolumeCloneArgs {
    const NAME: &'static str = "volume-clone";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_CLONE", "AFTER_CLONE"]
    }

    fn check(&self) -> Result<()> {
        self.source()?;
        optional_selector(self.dest_account.as_deref(), self.dest_account_id, "destination account")?;
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let search = match self.source()? {
            NameOrId::Name(name) => crate::cluster::VolumeSearch::by_names([name]),
            NameOrId::Id(id) => crate::cluster::VolumeSearch::by_ids([id]),
        };
        let source = cluster
            .search_volumes(&search)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::unknown("Could not find the source volume"))?;

        let new_account_id = match optional_selector(self.dest_account.as_deref(), self.dest_account_id, "destination account")? {
            Some(selector) => Some(cluster.find_account(&selector).await?.account_id),
            None => None,
        };
        let new_size = self.new_size.map(|size| size_in_bytes(size, self.gib));
        if let Some(size) = new_size {
            if size < source.total_size {
                warn!("Clone size {} is smaller than the source size {}; the source size will be used", size, source.total_size);
            }
        }
        let request = CloneRequest {
            volume_id: source.volume_id,
            name: self.clone_name.clone(),
            access: self.access,
            new_size: new_size.filter(|size| *size >= source.total_size),
            new_account_id,
        };

        hooks.raise("BEFORE_CLONE")?;
        let volume_id = cluster.clone_volume(&request, Duration::from_secs(self.timeout)).await?;
        logging::pass(format!("Successfully cloned {} to {} ({})", source, self.clone_name, volume_id));
        hooks.raise("AFTER_CLONE")?;
        Ok(json!({ "volumeID": volume_id }))
    }
}
