//! Subcommand implementations.
//!
//! Each subcommand is an argument struct deriving `clap::Args` and
//! `validator::Validate` and implementing [`Action`](crate::action::Action).

pub mod account;
pub mod cluster;
pub mod drives;
pub mod gc;
pub mod network;
pub mod node;
pub mod pairing;
pub mod volgroup;
pub mod volume;

use clap::Args;
use serde_json::{json, Value};
use validator::Validate;

use crate::cluster::VolumeSearch;
use crate::error::Result;
use crate::executor::PoolReport;
use crate::logging;
use crate::validate::NameOrId;

/// `Some` selector when either part is given, `None` when neither is.
pub fn optional_selector(name: Option<&str>, id: Option<u64>, what: &str) -> Result<Option<NameOrId>> {
    if name.is_none() && id.is_none() {
        return Ok(None);
    }
    NameOrId::from_parts(name, id, what).map(Some)
}

/// Turn a fan-out report into the action result, logging each failure.
pub fn pool_result<T>(report: PoolReport<T>, verb: &str, done: &str) -> Result<Value> {
    let total = report.total();
    report.into_result(verb)?;
    logging::pass(format!("Successfully {} {} volumes", done, total));
    Ok(json!(true))
}

/// Flags that pick a set of volumes.
#[derive(Args, Debug, Clone, Default, Validate)]
pub struct VolumeSelectArgs {
    /// Volume name to select; may be repeated
    #[arg(long = "volume-name")]
    pub volume_names: Vec<String>,

    /// Volume ID to select; may be repeated or comma separated
    #[arg(long = "volume-id", value_delimiter = ',')]
    #[validate(custom(function = "crate::validate::positive_id_list"))]
    pub volume_ids: Vec<u64>,

    /// Select volumes whose name starts with this (case-insensitive)
    #[arg(long)]
    pub volume_prefix: Option<String>,

    /// Select volumes whose name matches this regex
    #[arg(long)]
    #[validate(custom(function = "crate::validate::regex_pattern"))]
    pub volume_regex: Option<String>,

    /// Select at most this many volumes
    #[arg(long)]
    #[validate(range(min = 1))]
    pub volume_count: Option<usize>,

    /// Only volumes owned by this account
    #[arg(long)]
    pub source_account: Option<String>,

    /// Only volumes owned by this account ID
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub source_account_id: Option<u64>,

    /// Only volumes in this volume access group
    #[arg(long)]
    pub source_volgroup: Option<String>,

    /// Only volumes in this volume access group ID
    #[arg(long)]
    #[validate(custom(function = "crate::validate::positive_id"))]
    pub source_volgroup_id: Option<u64>,

    /// Fail instead of warning when a name matches several volumes
    #[arg(long)]
    pub strict_names: bool,
}

impl VolumeSelectArgs {
    pub fn to_search(&self) -> Result<VolumeSearch> {
        let search = VolumeSearch {
            ids: self.volume_ids.clone(),
            names: self.volume_names.clone(),
            regex: self.volume_regex.clone(),
            prefix: self.volume_prefix.clone(),
            account: optional_selector(self.source_account.as_deref(), self.source_account_id, "account")?,
            volgroup: optional_selector(self.source_volgroup.as_deref(), self.source_volgroup_id, "volume group")?,
            count: self.volume_count,
            deleted: false,
            strict_names: self.strict_names,
        };
        if search.is_empty() {
            return Err(crate::error::Error::argument(
                "Please specify at least one volume selection criterion",
            ));
        }
        Ok(search)
    }
}
