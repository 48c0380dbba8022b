//! Volume search and bulk volume operations.

use regex::RegexBuilder;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Cluster, Outcome};
use crate::api::client::{CloneRequest, NewVolume, VolumeChanges};
use crate::api::types::{Qos, Volume, VolumeAccess};
use crate::error::{Error, Result};
use crate::executor::{PoolReport, TaskPool};
use crate::validate::NameOrId;

/// Block size volumes are rounded up to.
pub const BLOCK_SIZE: u64 = 4096;

/// Volume sizes are rounded up to whole 4 KiB blocks by the cluster.
pub fn round_to_block(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Bytes in `size` units of GB (or GiB when `binary`).
pub fn size_in_bytes(size: u64, binary: bool) -> u64 {
    let multiplier: u64 = if binary { 1024 * 1024 * 1024 } else { 1000 * 1000 * 1000 };
    size.saturating_mul(multiplier)
}

/// Which volumes an operation applies to.
///
/// At most one of `ids`, `names`, `regex` and `prefix` selects; the account
/// and group filters narrow the candidates first, `count` caps the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSearch {
    pub ids: Vec<u64>,
    pub names: Vec<String>,
    pub regex: Option<String>,
    pub prefix: Option<String>,
    pub account: Option<NameOrId>,
    pub volgroup: Option<NameOrId>,
    pub count: Option<usize>,
    /// Search deleted (not yet purged) volumes instead of active ones
    pub deleted: bool,
    /// Duplicate names are an error instead of a warning
    pub strict_names: bool,
}

impl VolumeSearch {
    pub fn by_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn by_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether any criterion at all was given.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
            && self.names.is_empty()
            && self.regex.is_none()
            && self.prefix.is_none()
            && self.account.is_none()
            && self.volgroup.is_none()
            && self.count.is_none()
    }
}

/// Apply the selectors of `search` to `candidates`, in volume ID order.
pub fn filter_volumes(mut candidates: Vec<Volume>, search: &VolumeSearch) -> Result<Vec<Volume>> {
    candidates.sort_by_key(|v| v.volume_id);

    let mut found = if !search.ids.is_empty() {
        let wanted: HashSet<u64> = search.ids.iter().copied().collect();
        let found: Vec<Volume> = candidates.into_iter().filter(|v| wanted.contains(&v.volume_id)).collect();
        if found.len() != wanted.len() {
            let present: HashSet<u64> = found.iter().map(|v| v.volume_id).collect();
            let mut missing: Vec<u64> = wanted.difference(&present).copied().collect();
            missing.sort_unstable();
            return Err(Error::unknown(format!("Could not find volume IDs {:?}", missing)));
        }
        found
    } else if !search.names.is_empty() {
        let mut found = Vec::with_capacity(search.names.len());
        for name in &search.names {
            let matches: Vec<&Volume> = candidates.iter().filter(|v| &v.name == name).collect();
            match matches.as_slice() {
                [] => return Err(Error::unknown(format!("Could not find volume named {}", name))),
                [only] => found.push((*only).clone()),
                [first, ..] => {
                    let ids: Vec<u64> = matches.iter().map(|v| v.volume_id).collect();
                    if search.strict_names {
                        return Err(Error::Ambiguous {
                            what: "volumes".into(),
                            name: name.clone(),
                            ids,
                        });
                    }
                    warn!("Found {} volumes named {} (ids {:?}), using {}", ids.len(), name, ids, first.volume_id);
                    found.push((*first).clone());
                }
            }
        }
        found.dedup_by_key(|v| v.volume_id);
        found
    } else if let Some(pattern) = &search.regex {
        let regex = RegexBuilder::new(pattern)
            .build()
            .map_err(|e| Error::argument(format!("Invalid regex '{}': {}", pattern, e)))?;
        candidates.into_iter().filter(|v| regex.is_match(&v.name)).collect()
    } else if let Some(prefix) = &search.prefix {
        let prefix = prefix.to_lowercase();
        candidates
            .into_iter()
            .filter(|v| v.name.to_lowercase().starts_with(&prefix))
            .collect()
    } else {
        candidates
    };

    if let Some(count) = search.count {
        found.truncate(count);
    }
    Ok(found)
}

impl Cluster {
    pub async fn list_active_volumes(&self) -> Result<Vec<Volume>> {
        self.api().list_active_volumes().await
    }

    pub async fn list_deleted_volumes(&self) -> Result<Vec<Volume>> {
        self.api().list_deleted_volumes().await
    }

    /// Volumes matching `search`. Finding nothing is an error.
    pub async fn search_volumes(&self, search: &VolumeSearch) -> Result<Vec<Volume>> {
        if search.is_empty() {
            return Err(Error::argument("Please specify at least one volume selection criterion"));
        }
        debug!("Searching for volumes {:?}", search);

        let mut candidates = if search.deleted {
            self.list_deleted_volumes().await?
        } else {
            self.list_active_volumes().await?
        };

        if let Some(selector) = &search.account {
            let account = self.find_account(selector).await?;
            candidates.retain(|v| v.account_id == account.account_id);
        }
        if let Some(selector) = &search.volgroup {
            let group = self.find_volgroup(selector).await?;
            let members: HashSet<u64> = group.volumes.iter().copied().collect();
            candidates.retain(|v| members.contains(&v.volume_id));
        }

        let found = filter_volumes(candidates, search)?;
        if found.is_empty() {
            return Err(Error::unknown("No volumes matched the search criteria"));
        }
        Ok(found)
    }

    /// Create volumes named `names` from `template`.
    ///
    /// Names already present in the account are left alone, or are an error
    /// when `strict` is set.
    pub async fn create_volumes(&self, names: &[String], template: &NewVolume, strict: bool) -> Result<Vec<Outcome<u64>>> {
        let existing = self.api().list_volumes_for_account(template.account_id).await?;
        let mut outcomes = Vec::with_capacity(names.len());
        let mut to_create = Vec::new();
        for name in names {
            match existing.iter().find(|v| &v.name == name && !v.is_deleted()) {
                Some(volume) if strict => {
                    return Err(Error::other(format!("Volume {} already exists", volume)));
                }
                Some(volume) => {
                    debug!("Volume {} already exists", volume);
                    outcomes.push(Outcome::Unchanged(volume.volume_id));
                }
                None => to_create.push(name.clone()),
            }
        }

        if !to_create.is_empty() {
            info!("Creating {} volumes", to_create.len());
            let ids = self.api().create_volumes(&to_create, template).await?;
            outcomes.extend(ids.into_iter().map(Outcome::Changed));
        }
        Ok(outcomes)
    }

    /// Delete volumes and optionally purge them right away.
    pub async fn delete_volumes(&self, volumes: &[Volume], purge: bool) -> Result<()> {
        let ids: Vec<u64> = volumes.iter().map(|v| v.volume_id).collect();
        info!("Deleting {} volumes", ids.len());
        self.api().delete_volumes(&ids).await?;
        if purge {
            info!("Purging {} volumes", ids.len());
            self.api().purge_deleted_volumes(&ids).await?;
        }
        Ok(())
    }

    pub async fn purge_volumes(&self, volumes: &[Volume]) -> Result<()> {
        let ids: Vec<u64> = volumes.iter().map(|v| v.volume_id).collect();
        info!("Purging {} volumes", ids.len());
        self.api().purge_deleted_volumes(&ids).await
    }

    /// Apply a change to each volume in parallel; `build` fills in the fields.
    pub async fn modify_volumes<F>(&self, volumes: &[Volume], build: F) -> Result<PoolReport<Volume>>
    where
        F: Fn(&Volume) -> VolumeChanges,
    {
        let pool = TaskPool::for_calls(&self.config().parallel);
        let tasks = volumes
            .iter()
            .map(|volume| {
                let cluster = self.clone();
                let changes = build(volume);
                (volume.name.clone(), async move { cluster.api().modify_volume(&changes).await })
            })
            .collect();
        pool.run(tasks).await
    }

    /// Grow volumes to `new_size` bytes.
    pub async fn extend_volumes(&self, volumes: &[Volume], new_size: u64) -> Result<PoolReport<Volume>> {
        for volume in volumes {
            if volume.total_size > new_size {
                return Err(Error::argument(format!(
                    "New size {} is smaller than the current size of volume {}",
                    new_size, volume
                )));
            }
        }
        self.modify_volumes(volumes, |v| VolumeChanges {
            total_size: Some(new_size),
            ..VolumeChanges::new(v.volume_id)
        })
        .await
    }

    pub async fn set_volume_qos(&self, volumes: &[Volume], qos: Qos) -> Result<PoolReport<Volume>> {
        self.modify_volumes(volumes, |v| VolumeChanges {
            qos: Some(qos),
            ..VolumeChanges::new(v.volume_id)
        })
        .await
    }

    /// Lock, unlock or otherwise change the access mode of volumes.
    pub async fn set_volume_access(&self, volumes: &[Volume], access: VolumeAccess) -> Result<PoolReport<Volume>> {
        self.modify_volumes(volumes, |v| VolumeChanges {
            access: Some(access),
            ..VolumeChanges::new(v.volume_id)
        })
        .await
    }

    /// Clone a volume and wait for the clone to finish. Returns the new volume ID.
    pub async fn clone_volume(&self, request: &CloneRequest, timeout: Duration) -> Result<u64> {
        info!("Cloning volume {} to {}", request.volume_id, request.name);
        let handle = self.api().clone_volume(request).await?;
        let result = self.wait_for_async_handle(handle, timeout).await?;
        result
            .result
            .get("volumeID")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::transport(self.mvip(), "Clone result is missing volumeID"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn volume(id: u64, name: &str, account_id: u64) -> Volume {
        Volume {
            volume_id: id,
            name: name.into(),
            account_id,
            status: "active".into(),
            ..Default::default()
        }
    }

    fn sample() -> Vec<Volume> {
        vec![
            volume(5, "data-3", 2),
            volume(1, "data-1", 1),
            volume(2, "Data-2", 1),
            volume(3, "logs", 1),
            volume(4, "data-1", 2),
        ]
    }

    fn ids(volumes: &[Volume]) -> Vec<u64> {
        volumes.iter().map(|v| v.volume_id).collect()
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to_block(1), 4096);
        assert_eq!(round_to_block(4096), 4096);
        assert_eq!(round_to_block(size_in_bytes(1, false)), 1_000_001_536);
        assert_eq!(size_in_bytes(1, true), 1_073_741_824);
    }

    #[test]
    fn test_by_ids() {
        let found = filter_volumes(sample(), &VolumeSearch::by_ids([3, 1])).unwrap();
        assert_eq!(ids(&found), vec![1, 3]);

        let err = filter_volumes(sample(), &VolumeSearch::by_ids([1, 9])).unwrap_err();
        assert!(matches!(err, Error::UnknownObject(_)));
    }

    #[test]
    fn test_by_name_first_match_wins() {
        let found = filter_volumes(sample(), &VolumeSearch::by_names(["data-1"])).unwrap();
        assert_eq!(ids(&found), vec![1]);
    }

    #[test]
    fn test_by_name_strict_is_ambiguous() {
        let search = VolumeSearch {
            strict_names: true,
            ..VolumeSearch::by_names(["data-1"])
        };
        match filter_volumes(sample(), &search).unwrap_err() {
            Error::Ambiguous { name, ids, .. } => {
                assert_eq!(name, "data-1");
                assert_eq!(ids, vec![1, 4]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_name() {
        let err = filter_volumes(sample(), &VolumeSearch::by_names(["nope"])).unwrap_err();
        assert_eq!(err.to_string(), "Could not find volume named nope");
    }

    #[test]
    fn test_regex_with_count() {
        let search = VolumeSearch {
            regex: Some("^data".into()),
            count: Some(2),
            ..Default::default()
        };
        let found = filter_volumes(sample(), &search).unwrap();
        assert_eq!(ids(&found), vec![1, 4]);
    }

    #[test]
    fn test_invalid_regex() {
        let search = VolumeSearch {
            regex: Some("(".into()),
            ..Default::default()
        };
        assert!(matches!(filter_volumes(sample(), &search).unwrap_err(), Error::Argument(_)));
    }

    #[test]
    fn test_prefix_case_insensitive() {
        let search = VolumeSearch {
            prefix: Some("DATA".into()),
            ..Default::default()
        };
        let found = filter_volumes(sample(), &search).unwrap();
        assert_eq!(ids(&found), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_no_selector_returns_all() {
        let search = VolumeSearch {
            count: Some(3),
            ..Default::default()
        };
        assert_eq!(ids(&filter_volumes(sample(), &search).unwrap()), vec![1, 2, 3]);
        assert!(!search.is_empty());
        assert!(VolumeSearch::default().is_empty());
    }
}
