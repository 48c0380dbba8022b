//! Account subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use super::{pool_result, VolumeSelectArgs};
use crate::action::{Action, ActionContext, EventHooks, QueryAction};
use crate::cluster::Outcome;
use crate::error::Result;
use crate::logging;
use crate::validate::NameOrId;

/// Create an account
#[derive(Args, Debug, Clone, Validate)]
pub struct AccountCreateArgs {
    /// Name of the account
    #[arg(long)]
    #[validate(custom(function = "crate::validate::not_blank"))]
    pub account_name: String,

    /// Initiator CHAP secret; generated when omitted
    #[arg(long)]
    #[validate(custom(function = "crate::validate::chap_secret"))]
    pub initiator_secret: Option<String>,

    /// Target CHAP secret; generated when omitted
    #[arg(long)]
    #[validate(custom(function = "crate::validate::chap_secret"))]
    pub target_secret: Option<String>,

    /// Fail if the account already exists
    #[arg(long)]
    pub strict: bool,
}

#[async_trait]
impl Action for AccountCreateArgs {
    const NAME: &'static str = "account-create";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_CREATE_ACCOUNT", "AFTER_CREATE_ACCOUNT"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_CREATE_ACCOUNT")?;
        let outcome = cluster
            .create_account(
                &self.account_name,
                self.initiator_secret.as_deref(),
                self.target_secret.as_deref(),
                self.strict,
            )
            .await?;
        let account = match outcome {
            Outcome::Changed(account) => {
                logging::pass(format!("Successfully created account {}", account.username));
                account
            }
            Outcome::Unchanged(account) => {
                logging::pass(format!("Account {} already exists", account.username));
                account
            }
        };
        hooks.raise("AFTER_CREATE_ACCOUNT")?;
        Ok(json!({ "accountID": account.account_id }))
    }
}

/// Delete an account, purging its deleted volumes first
#[derive(Args, Debug, Clone, Validate)]
pub struct AccountDeleteArgs {
    /// Name of the account
    #[arg(long)]
    pub account_name: Option<String>,

    /// ID of the account
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub account_id: Option<u64>,

    /// Fail if the account does not exist
    #[arg(long)]
    pub strict: bool,
}

impl AccountDeleteArgs {
    fn selector(&self) -> Result<NameOrId> {
        NameOrId::from_parts(self.account_name.as_deref(), self.account_id, "account")
    }
}

#[async_trait]
impl Action for AccountDeleteArgs {
    const NAME: &'static str = "account-delete";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_DELETE_ACCOUNT", "AFTER_DELETE_ACCOUNT"]
    }

    fn check(&self) -> Result<()> {
        self.selector().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let selector = self.selector()?;
        hooks.raise("BEFORE_DELETE_ACCOUNT")?;
        match cluster.delete_account(&selector, self.strict).await? {
            Outcome::Changed(_) => logging::pass(format!("Successfully deleted account {}", selector)),
            Outcome::Unchanged(_) => logging::pass(format!("Account {} does not exist", selector)),
        }
        hooks.raise("AFTER_DELETE_ACCOUNT")?;
        Ok(json!(true))
    }
}

/// Move volumes to a different account
#[derive(Args, Debug, Clone, Validate)]
pub struct AccountMoveVolumesArgs {
    #[command(flatten)]
    #[validate(nested)]
    pub select: VolumeSelectArgs,

    /// Account to move the volumes to
    #[arg(long)]
    pub dest_account: Option<String>,

    /// ID of the account to move the volumes to
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub dest_account_id: Option<u64>,
}

impl AccountMoveVolumesArgs {
    fn destination(&self) -> Result<NameOrId> {
        NameOrId::from_parts(self.dest_account.as_deref(), self.dest_account_id, "destination account")
    }
}

#[async_trait]
impl Action for AccountMoveVolumesArgs {
    const NAME: &'static str = "account-move-volumes";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_MOVE_VOLUMES", "AFTER_MOVE_VOLUMES"]
    }

    fn check(&self) -> Result<()> {
        self.destination()?;
        self.select.to_search().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        let account = cluster.find_account(&self.destination()?).await?;
        let volumes: Vec<_> = cluster
            .search_volumes(&self.select.to_search()?)
            .await?
            .into_iter()
            .filter(|v| v.account_id != account.account_id)
            .collect();
        if volumes.is_empty() {
            logging::pass(format!("All volumes are already in account {}", account.username));
            return Ok(json!(true));
        }

        hooks.raise("BEFORE_MOVE_VOLUMES")?;
        info!("Moving {} volumes to account {}", volumes.len(), account.username);
        let report = cluster.move_volumes_to_account(&volumes, &account).await?;
        let result = pool_result(report, "move", "moved");
        hooks.raise("AFTER_MOVE_VOLUMES")?;
        result
    }
}

/// List the active volume IDs of an account
#[derive(Args, Debug, Clone, Validate)]
pub struct AccountListVolumesArgs {
    /// Name of the account
    #[arg(long)]
    pub account_name: Option<String>,

    /// ID of the account
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub account_id: Option<u64>,

    /// List volume names instead of IDs
    #[arg(long)]
    pub by_name: bool,
}

impl AccountListVolumesArgs {
    fn selector(&self) -> Result<NameOrId> {
        NameOrId::from_parts(self.account_name.as_deref(), self.account_id, "account")
    }
}

#[async_trait]
impl QueryAction for AccountListVolumesArgs {
    type Output = Vec<Value>;

    async fn get(&self, ctx: &ActionContext) -> Result<Self::Output> {
        let cluster = ctx.cluster()?;
        let account = cluster.find_account(&self.selector()?).await?;
        let volumes = cluster.account_volumes(&account).await?;
        Ok(volumes
            .into_iter()
            .map(|v| if self.by_name { json!(v.name) } else { json!(v.volume_id) })
            .collect())
    }

    fn human(&self, output: &Self::Output) -> Vec<String> {
        vec![format!("{} volumes: {}", output.len(), self.items(output).join(", "))]
    }

    fn items(&self, output: &Self::Output) -> Vec<String> {
        output
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect()
    }
}

#[async_trait]
impl Action for AccountListVolumesArgs {
    const NAME: &'static str = "account-list-volumes";

    fn check(&self) -> Result<()> {
        self.selector().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, _hooks: &EventHooks) -> Result<Value> {
        self.get_and_show(ctx).await
    }
}
