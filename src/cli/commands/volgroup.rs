//! Volume access group subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use validator::Validate;

use super::VolumeSelectArgs;
use crate::action::{Action, ActionContext, EventHooks};
use crate::cluster::{LunPolicy, Outcome, MAX_LUN};
use crate::error::{Error, Result};
use crate::logging;
use crate::validate::NameOrId;

/// Flags naming one volume access group.
#[derive(Args, Debug, Clone, Default, Validate)]
pub struct VolgroupSelectArgs {
    /// Name of the volume access group
    #[arg(long)]
    pub volgroup_name: Option<String>,

    /// ID of the volume access group
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub volgroup_id: Option<u64>,
}

impl VolgroupSelectArgs {
    pub fn selector(&self) -> Result<NameOrId> {
        NameOrId::from_parts(self.volgroup_name.as_deref(), self.volgroup_id, "volume group")
    }
}

/// Create a volume access group
#[derive(Args, Debug, Clone, Validate)]
pub struct VolgroupCreateArgs {
    /// Name of the new group
    #[arg(long)]
    #[validate(custom(function = "crate::validate::not_blank"))]
    pub volgroup_name: String,

    /// IQN or WWN to put in the group; may be repeated or comma separated
    #[arg(long = "initiator", value_delimiter = ',')]
    #[validate(custom(function = "initiators_if_any"))]
    pub initiators: Vec<String>,

    /// Volume ID to put in the group; may be repeated or comma separated
    #[arg(long = "volume-id", value_delimiter = ',')]
    #[validate(custom(function = "crate::validate::positive_id_list"))]
    pub volume_ids: Vec<u64>,

    /// Fail if the group already exists
    #[arg(long)]
    pub strict: bool,
}

fn initiators_if_any(values: &[String]) -> std::result::Result<(), validator::ValidationError> {
    if values.is_empty() {
        return Ok(());
    }
    crate::validate::initiator_list(values)
}

#[async_trait]
impl Action for VolgroupCreateArgs {
    const NAME: &'static str = "volgroup-create";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_CREATE_VOLGROUP", "AFTER_CREATE_VOLGROUP"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_CREATE_VOLGROUP")?;
        let outcome = cluster
            .create_volgroup(&self.volgroup_name, &self.initiators, &self.volume_ids, self.strict)
            .await?;
        let changed = outcome.changed();
        let group = outcome.into_inner();
        if changed {
            logging::pass(format!("Successfully created group {}", group.name));
        } else {
            logging::pass(format!("Group {} already exists", group.name));
        }
        hooks.raise("AFTER_CREATE_VOLGROUP")?;
        Ok(json!({ "volumeAccessGroupID": group.volume_access_group_id }))
    }
}

/// Delete a volume access group
#[derive(Args, Debug, Clone, Validate)]
pub struct VolgroupDeleteArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub group: VolgroupSelectArgs,

    /// Fail if the group does not exist
    #[arg(long)]
    pub strict: bool,
}

#[async_trait]
impl Action for VolgroupDeleteArgs {
    const NAME: &'static str = "volgroup-delete";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_DELETE_VOLGROUP", "AFTER_DELETE_VOLGROUP"]
    }

    fn check(&self) -> Result<()> {
        self.group.selector().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let selector = self.group.selector()?;
        hooks.raise("BEFORE_DELETE_VOLGROUP")?;
        match cluster.delete_volgroup(&selector, self.strict).await? {
            Outcome::Changed(_) => logging::pass(format!("Successfully deleted group {}", selector)),
            Outcome::Unchanged(_) => logging::pass(format!("Group {} does not exist", selector)),
        }
        hooks.raise("AFTER_DELETE_VOLGROUP")?;
        Ok(json!(true))
    }
}

/// Add IQNs or WWNs to a volume access group
#[derive(Args, Debug, Clone, Validate)]
pub struct VolgroupAddInitiatorsArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub group: VolgroupSelectArgs,

    /// IQN or WWN to add; may be repeated or comma separated
    #[arg(long = "initiator", value_delimiter = ',', required = true)]
    #[validate(custom(function = "crate::validate::initiator_list"))]
    pub initiators: Vec<String>,
}

#[async_trait]
impl Action for VolgroupAddInitiatorsArgs {
    const NAME: &'static str = "volgroup-add-initiators";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_ADD", "AFTER_ADD"]
    }

    fn check(&self) -> Result<()> {
        self.group.selector().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let group = cluster.find_volgroup(&self.group.selector()?).await?;
        hooks.raise("BEFORE_ADD")?;
        match cluster.add_initiators_to_volgroup(&group, &self.initiators).await? {
            Outcome::Changed(added) => {
                logging::pass(format!("Successfully added {} to group {}", added.join(", "), group.name))
            }
            Outcome::Unchanged(_) => logging::pass(format!("All initiators are already in group {}", group.name)),
        }
        hooks.raise("AFTER_ADD")?;
        Ok(json!(true))
    }
}

/// Remove IQNs or WWNs from a volume access group
#[derive(Args, Debug, Clone, Validate)]
pub struct VolgroupRemoveInitiatorsArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub group: VolgroupSelectArgs,

    /// IQN or WWN to remove; may be repeated or comma separated
    #[arg(long = "initiator", value_delimiter = ',', required = true)]
    #[validate(custom(function = "crate::validate::initiator_list"))]
    pub initiators: Vec<String>,
}

#[async_trait]
impl Action for VolgroupRemoveInitiatorsArgs {
    const NAME: &'static str = "volgroup-remove-initiators";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_REMOVE", "AFTER_REMOVE"]
    }

    fn check(&self) -> Result<()> {
        self.group.selector().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let group = cluster.find_volgroup(&self.group.selector()?).await?;
        hooks.raise("BEFORE_REMOVE")?;
        match cluster.remove_initiators_from_volgroup(&group, &self.initiators).await? {
            Outcome::Changed(removed) => logging::pass(format!(
                "Successfully removed {} from group {}",
                removed.join(", "),
                group.name
            )),
            Outcome::Unchanged(_) => logging::pass(format!("None of the initiators are in group {}", group.name)),
        }
        hooks.raise("AFTER_REMOVE")?;
        Ok(json!(true))
    }
}

/// Add volumes to a volume access group
#[derive(Args, Debug, Clone, Validate)]
pub struct VolgroupAddVolumesArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub group: VolgroupSelectArgs,

    #[command(flatten)]
    #[validate(nested)]
    pub select: VolumeSelectArgs,
}

#[async_trait]
impl Action for VolgroupAddVolumesArgs {
    const NAME: &'static str = "volgroup-add-volumes";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_ADD", "AFTER_ADD"]
    }

    fn check(&self) -> Result<()> {
        self.group.selector()?;
        self.select.to_search().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let group = cluster.find_volgroup(&self.group.selector()?).await?;
        let ids: Vec<u64> = cluster
            .search_volumes(&self.select.to_search()?)
            .await?
            .iter()
            .map(|v| v.volume_id)
            .collect();
        hooks.raise("BEFORE_ADD")?;
        match cluster.add_volumes_to_volgroup(&group, &ids).await? {
            Outcome::Changed(added) => {
                logging::pass(format!("Successfully added {} volumes to group {}", added.len(), group.name))
            }
            Outcome::Unchanged(_) => logging::pass(format!("All volumes are already in group {}", group.name)),
        }
        hooks.raise("AFTER_ADD")?;
        Ok(json!(true))
    }
}

/// Renumber the LUNs of the volumes in a volume access group
#[derive(Args, Debug, Clone, Validate)]
pub struct VolgroupModifyLunAssignmentsArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub group: VolgroupSelectArgs,

    /// How to pick the new LUNs
    #[arg(long, value_enum, default_value = "seq")]
    pub method: LunPolicy,

    /// Lowest LUN to use
    #[arg(long, default_value_t = 0)]
    #[validate(custom(function = "crate::validate::lun"))]
    pub lun_min: u32,

    /// Highest LUN to use
    #[arg(long, default_value_t = MAX_LUN)]
    #[validate(custom(function = "crate::validate::lun"))]
    pub lun_max: u32,
}

#[async_trait]
impl Action for VolgroupModifyLunAssignmentsArgs {
    const NAME: &'static str = "volgroup-modify-lun-assignments";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_MODIFY", "AFTER_MODIFY"]
    }

    fn check(&self) -> Result<()> {
        self.group.selector()?;
        if self.lun_max < self.lun_min {
            return Err(Error::argument("lun_max must be greater than or equal to lun_min"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let group = cluster.find_volgroup(&self.group.selector()?).await?;
        if group.volumes.is_empty() {
            logging::pass(format!("There are no volumes in group {}", group.name));
            return Ok(json!(true));
        }
        hooks.raise("BEFORE_MODIFY")?;
        let assignments = cluster
            .renumber_luns(&group, self.method, self.lun_min, self.lun_max)
            .await?;
        logging::pass(format!(
            "Successfully assigned {} LUNs in group {}",
            assignments.len(),
            group.name
        ));
        hooks.raise("AFTER_MODIFY")?;
        Ok(json!(true))
    }
}
