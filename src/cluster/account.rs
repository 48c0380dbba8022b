//! Tenant accounts.

use tracing::{debug, info};

use super::{same_name, Cluster, Outcome};
use crate::api::client::VolumeChanges;
use crate::api::types::{Account, Volume};
use crate::error::{Error, Result};
use crate::executor::{PoolReport, TaskPool};
use crate::util::simple_chap_secret;
use crate::validate::NameOrId;

/// Length of generated CHAP secrets.
pub const CHAP_SECRET_LENGTH: usize = 14;

/// Find an account in a listing by name (case-insensitive) or ID.
///
/// Duplicate names resolve to the first match.
pub fn select_account<'a>(accounts: &'a [Account], selector: &NameOrId) -> Result<&'a Account> {
    let found = match selector {
        NameOrId::Name(name) => accounts.iter().find(|a| same_name(&a.username, name)),
        NameOrId::Id(id) => accounts.iter().find(|a| a.account_id == *id),
    };
    found.ok_or_else(|| match selector {
        NameOrId::Name(name) => Error::unknown(format!("Could not find account with name {}", name)),
        NameOrId::Id(id) => Error::unknown(format!("Could not find account with ID {}", id)),
    })
}

impl Cluster {
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.api().list_accounts().await
    }

    pub async fn find_account(&self, selector: &NameOrId) -> Result<Account> {
        let accounts = self.list_accounts().await?;
        select_account(&accounts, selector).cloned()
    }

    /// Like [`Cluster::find_account`] but a missing account is `None`.
    pub async fn find_account_opt(&self, selector: &NameOrId) -> Result<Option<Account>> {
        match self.find_account(selector).await {
            Ok(account) => Ok(Some(account)),
            Err(Error::UnknownObject(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create an account, generating CHAP secrets that are not supplied.
    ///
    /// An existing account with the same name is returned unchanged, or is
    /// an error when `strict` is set.
    pub async fn create_account(
        &self,
        username: &str,
        initiator_secret: Option<&str>,
        target_secret: Option<&str>,
        strict: bool,
    ) -> Result<Outcome<Account>> {
        if let Some(existing) = self.find_account_opt(&NameOrId::Name(username.to_string())).await? {
            if strict {
                return Err(Error::other(format!("Account {} already exists", username)));
            }
            return Ok(Outcome::Unchanged(existing));
        }

        let initiator_secret = initiator_secret
            .map(str::to_string)
            .unwrap_or_else(|| simple_chap_secret(CHAP_SECRET_LENGTH));
        let target_secret = target_secret
            .map(str::to_string)
            .unwrap_or_else(|| simple_chap_secret(CHAP_SECRET_LENGTH));

        info!("Creating account '{}'", username);
        let account_id = self
            .api()
            .add_account(username, Some(&initiator_secret), Some(&target_secret))
            .await?;
        let account = self.find_account(&NameOrId::Id(account_id)).await?;
        Ok(Outcome::Changed(account))
    }

    /// Purge the account's deleted volumes, returning how many there were.
    pub async fn purge_account_deleted_volumes(&self, account: &Account) -> Result<usize> {
        let deleted: Vec<u64> = self
            .api()
            .list_volumes_for_account(account.account_id)
            .await?
            .into_iter()
            .filter(Volume::is_deleted)
            .map(|v| v.volume_id)
            .collect();

        if deleted.is_empty() {
            debug!("No deleted volumes to purge from account {}", account.username);
            return Ok(0);
        }
        debug!("Purging {} deleted volumes from account {}", deleted.len(), account.username);
        self.api().purge_deleted_volumes(&deleted).await?;
        Ok(deleted.len())
    }

    /// Delete an account after purging its deleted volumes.
    ///
    /// A missing account is success unless `strict` is set.
    pub async fn delete_account(&self, selector: &NameOrId, strict: bool) -> Result<Outcome<Option<Account>>> {
        let Some(account) = self.find_account_opt(selector).await? else {
            if strict {
                return Err(Error::unknown(format!("Account {} does not exist", selector)));
            }
            return Ok(Outcome::Unchanged(None));
        };

        info!("Deleting account {}", account.username);
        self.purge_account_deleted_volumes(&account).await?;
        self.api().remove_account(account.account_id).await?;
        Ok(Outcome::Changed(Some(account)))
    }

    /// Active volumes owned by an account.
    pub async fn account_volumes(&self, account: &Account) -> Result<Vec<Volume>> {
        let mut volumes: Vec<Volume> = self
            .api()
            .list_volumes_for_account(account.account_id)
            .await?
            .into_iter()
            .filter(|v| !v.is_deleted())
            .collect();
        volumes.sort_by_key(|v| v.volume_id);
        Ok(volumes)
    }

    /// Reassign volumes to `account`, one API call per volume.
    pub async fn move_volumes_to_account(&self, volumes: &[Volume], account: &Account) -> Result<PoolReport<()>> {
        let pool = TaskPool::for_calls(&self.config().parallel);
        let target = account.account_id;
        let tasks = volumes
            .iter()
            .map(|volume| {
                let cluster = self.clone();
                let volume_id = volume.volume_id;
                info!("  Moving volume {} to account {}", volume.name, account.username);
                (volume.name.clone(), async move {
                    let mut changes = VolumeChanges::new(volume_id);
                    changes.account_id = Some(target);
                    let modified = cluster.api().modify_volume(&changes).await?;
                    if modified.account_id != target {
                        return Err(Error::other(format!(
                            "accountID is not the new account after modifying volume {}",
                            volume_id
                        )));
                    }
                    Ok(())
                })
            })
            .collect();
        pool.run(tasks).await
    }
}
