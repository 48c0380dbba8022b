//! Volume access groups: initiators, member volumes and LUN numbering.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, info};

use super::{same_name, Cluster, Outcome};
use crate::api::types::{is_iscsi_name, LunAssignment, VolumeAccessGroup};
use crate::error::{Error, Result};
use crate::validate::NameOrId;

pub use crate::api::types::initiator_key;
pub use crate::validate::MAX_LUN;

/// How to renumber the LUNs of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LunPolicy {
    /// Sequentially upward from the minimum
    #[value(name = "seq")]
    Sequential,
    /// Sequentially downward from the maximum
    #[value(name = "rev")]
    Reverse,
    /// Randomly chosen between minimum and maximum
    #[value(name = "rand")]
    Random,
    /// The volume ID is the LUN
    #[value(name = "vol")]
    VolumeId,
}

/// Assign LUNs to `volume_ids` within `[min, max]` according to `policy`.
pub fn plan_lun_assignments(volume_ids: &[u64], policy: LunPolicy, min: u32, max: u32) -> Result<Vec<LunAssignment>> {
    if min > max {
        return Err(Error::argument("lun_min must be <= lun_max"));
    }
    if max > MAX_LUN {
        return Err(Error::argument(format!("LUN numbers cannot exceed {}", MAX_LUN)));
    }
    let count = volume_ids.len() as u64;
    if count == 0 {
        return Ok(Vec::new());
    }
    let span = (max - min) as u64 + 1;

    let luns: Vec<u32> = match policy {
        LunPolicy::Sequential => {
            if count > span {
                return Err(Error::argument(format!(
                    "min LUN value is too high - {} volumes will exceed LUN {}",
                    count, max
                )));
            }
            (min..).take(volume_ids.len()).collect()
        }
        LunPolicy::Reverse => {
            if count > span {
                return Err(Error::argument(format!(
                    "max LUN value is too low - {} volumes will go below LUN {}",
                    count, min
                )));
            }
            (min..=max).rev().take(volume_ids.len()).collect()
        }
        LunPolicy::Random => {
            if count > span {
                return Err(Error::argument("min to max range is too small to fit all volumes in this group"));
            }
            let mut pool: Vec<u32> = (min..=max).collect();
            pool.shuffle(&mut rand::thread_rng());
            pool.truncate(volume_ids.len());
            pool
        }
        LunPolicy::VolumeId => {
            let mut luns = Vec::with_capacity(volume_ids.len());
            for id in volume_ids {
                match u32::try_from(*id) {
                    Ok(lun) if lun <= MAX_LUN => luns.push(lun),
                    _ => {
                        return Err(Error::argument(format!(
                            "Volume ID {} is too large to use as a LUN number",
                            id
                        )))
                    }
                }
            }
            luns
        }
    };

    Ok(volume_ids
        .iter()
        .zip(luns)
        .map(|(&volume_id, lun)| LunAssignment { volume_id, lun })
        .collect())
}

/// Find a group in a listing by name (case-insensitive) or ID.
pub fn select_volgroup<'a>(groups: &'a [VolumeAccessGroup], selector: &NameOrId) -> Result<&'a VolumeAccessGroup> {
    let found = match selector {
        NameOrId::Name(name) => groups.iter().find(|g| same_name(&g.name, name)),
        NameOrId::Id(id) => groups.iter().find(|g| g.volume_access_group_id == *id),
    };
    found.ok_or_else(|| match selector {
        NameOrId::Name(name) => Error::unknown(format!("Could not find group with name {}", name)),
        NameOrId::Id(id) => Error::unknown(format!("Could not find group with ID {}", id)),
    })
}

impl Cluster {
    pub async fn list_volgroups(&self) -> Result<Vec<VolumeAccessGroup>> {
        self.api().list_volume_access_groups().await
    }

    pub async fn find_volgroup(&self, selector: &NameOrId) -> Result<VolumeAccessGroup> {
        let groups = self.list_volgroups().await?;
        select_volgroup(&groups, selector).cloned()
    }

    pub async fn find_volgroup_opt(&self, selector: &NameOrId) -> Result<Option<VolumeAccessGroup>> {
        match self.find_volgroup(selector).await {
            Ok(group) => Ok(Some(group)),
            Err(Error::UnknownObject(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a group; an existing one of the same name is success unless `strict`.
    pub async fn create_volgroup(
        &self,
        name: &str,
        initiators: &[String],
        volume_ids: &[u64],
        strict: bool,
    ) -> Result<Outcome<VolumeAccessGroup>> {
        if let Some(existing) = self.find_volgroup_opt(&NameOrId::Name(name.to_string())).await? {
            if strict {
                return Err(Error::other(format!("Volume group {} already exists", name)));
            }
            return Ok(Outcome::Unchanged(existing));
        }

        info!("Creating volume group {}", name);
        let id = self.api().create_volume_access_group(name, initiators, volume_ids).await?;
        Ok(Outcome::Changed(self.find_volgroup(&NameOrId::Id(id)).await?))
    }

    /// Delete a group; a missing one is success unless `strict`.
    pub async fn delete_volgroup(&self, selector: &NameOrId, strict: bool) -> Result<Outcome<Option<VolumeAccessGroup>>> {
        let Some(group) = self.find_volgroup_opt(selector).await? else {
            if strict {
                return Err(Error::unknown(format!("Volume group {} does not exist", selector)));
            }
            return Ok(Outcome::Unchanged(None));
        };
        info!("Deleting volume group {}", group.name);
        self.api().delete_volume_access_group(group.volume_access_group_id).await?;
        Ok(Outcome::Changed(Some(group)))
    }

    /// Add initiators not already present. New entries are stored in their
    /// normalized form; nothing is sent when all are present.
    pub async fn add_initiators_to_volgroup(
        &self,
        group: &VolumeAccessGroup,
        initiators: &[String],
    ) -> Result<Outcome<Vec<String>>> {
        let (mut iscsi, fc) = group.split_initiators();
        let mut fc: Vec<String> = fc.iter().map(|wwn| initiator_key(wwn)).collect();
        let mut present: HashSet<String> = iscsi.iter().map(|i| initiator_key(i)).chain(fc.iter().cloned()).collect();
        let mut added = Vec::new();
        for initiator in initiators {
            let key = initiator_key(initiator);
            if !present.insert(key.clone()) {
                debug!("{} is already in group {}", initiator, group.name);
                continue;
            }
            if is_iscsi_name(&key) {
                iscsi.push(key.clone());
            } else {
                fc.push(key.clone());
            }
            added.push(key);
        }
        if added.is_empty() {
            return Ok(Outcome::Unchanged(added));
        }

        info!("Adding {} to group {}", added.join(", "), group.name);
        self.api()
            .modify_volume_access_group(group.volume_access_group_id, Some((iscsi.as_slice(), fc.as_slice())), None)
            .await?;
        Ok(Outcome::Changed(added))
    }

    /// Remove initiators that are present.
    pub async fn remove_initiators_from_volgroup(
        &self,
        group: &VolumeAccessGroup,
        initiators: &[String],
    ) -> Result<Outcome<Vec<String>>> {
        let remove: HashSet<String> = initiators.iter().map(|i| initiator_key(i)).collect();
        let (iscsi, fc) = group.split_initiators();
        let (mut removed, iscsi_kept): (Vec<String>, Vec<String>) =
            iscsi.into_iter().partition(|i| remove.contains(&initiator_key(i)));
        let (fc_removed, fc_kept): (Vec<String>, Vec<String>) =
            fc.into_iter().partition(|i| remove.contains(&initiator_key(i)));
        removed.extend(fc_removed);
        for initiator in initiators {
            if !removed.iter().any(|r| initiator_key(r) == initiator_key(initiator)) {
                debug!("{} is already not in group {}", initiator, group.name);
            }
        }
        if removed.is_empty() {
            return Ok(Outcome::Unchanged(removed));
        }

        self.api()
            .modify_volume_access_group(group.volume_access_group_id, Some((iscsi_kept.as_slice(), fc_kept.as_slice())), None)
            .await?;
        Ok(Outcome::Changed(removed))
    }

    /// Add volumes not already members.
    pub async fn add_volumes_to_volgroup(&self, group: &VolumeAccessGroup, volume_ids: &[u64]) -> Result<Outcome<Vec<u64>>> {
        let mut members = group.volumes.clone();
        let mut added = Vec::new();
        for id in volume_ids {
            if members.contains(id) {
                debug!("volumeID {} is already in group {}", id, group.name);
            } else {
                members.push(*id);
                added.push(*id);
            }
        }
        if added.is_empty() {
            return Ok(Outcome::Unchanged(added));
        }

        self.api()
            .modify_volume_access_group(group.volume_access_group_id, None, Some(&members))
            .await?;
        Ok(Outcome::Changed(added))
    }

    /// Remove member volumes.
    pub async fn remove_volumes_from_volgroup(&self, group: &VolumeAccessGroup, volume_ids: &[u64]) -> Result<Outcome<Vec<u64>>> {
        let (removed, kept): (Vec<u64>, Vec<u64>) = group.volumes.iter().partition(|id| volume_ids.contains(id));
        for id in volume_ids {
            if !removed.contains(id) {
                debug!("volumeID {} is already not in group {}", id, group.name);
            }
        }
        if removed.is_empty() {
            return Ok(Outcome::Unchanged(removed));
        }

        self.api()
            .modify_volume_access_group(group.volume_access_group_id, None, Some(&kept))
            .await?;
        Ok(Outcome::Changed(removed))
    }

    /// Renumber every LUN in the group.
    pub async fn renumber_luns(
        &self,
        group: &VolumeAccessGroup,
        policy: LunPolicy,
        min: u32,
        max: u32,
    ) -> Result<Vec<LunAssignment>> {
        let assignments = plan_lun_assignments(&group.volumes, policy, min, max)?;
        info!("Modifying LUN assignments in group {}", group.name);
        self.api()
            .modify_lun_assignments(group.volume_access_group_id, &assignments)
            .await?;
        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn luns(assignments: &[LunAssignment]) -> Vec<u32> {
        assignments.iter().map(|a| a.lun).collect()
    }

    #[test]
    fn test_sequential() {
        let plan = plan_lun_assignments(&[7, 3, 9], LunPolicy::Sequential, 10, MAX_LUN).unwrap();
        assert_eq!(luns(&plan), vec![10, 11, 12]);
        assert_eq!(plan[1].volume_id, 3);
    }

    #[test]
    fn test_reverse() {
        let plan = plan_lun_assignments(&[7, 3, 9], LunPolicy::Reverse, 0, 20).unwrap();
        assert_eq!(luns(&plan), vec![20, 19, 18]);
    }

    #[test]
    fn test_volume_id_policy() {
        let plan = plan_lun_assignments(&[7, 3], LunPolicy::VolumeId, 0, MAX_LUN).unwrap();
        assert_eq!(luns(&plan), vec![7, 3]);
        assert!(plan_lun_assignments(&[20000], LunPolicy::VolumeId, 0, MAX_LUN).is_err());
    }

    #[test]
    fn test_range_too_small() {
        let ids: Vec<u64> = (1..=5).collect();
        assert!(plan_lun_assignments(&ids, LunPolicy::Sequential, 16380, MAX_LUN).is_err());
        assert!(plan_lun_assignments(&ids, LunPolicy::Reverse, 0, 3).is_err());
        assert!(plan_lun_assignments(&ids, LunPolicy::Random, 10, 13).is_err());
        assert!(plan_lun_assignments(&ids, LunPolicy::Random, 10, 14).is_ok());
        assert!(plan_lun_assignments(&ids, LunPolicy::Sequential, 9, 8).is_err());
        assert!(plan_lun_assignments(&ids, LunPolicy::Sequential, 0, MAX_LUN + 1).is_err());
    }

    #[test]
    fn test_initiator_key() {
        assert_eq!(initiator_key("10:00:00:90:FA:34:AD:72"), "10000090fa34ad72");
        assert_eq!(initiator_key("10000090fa34ad72"), "10000090fa34ad72");
        assert_eq!(initiator_key("IQN.2010-01.com.example:host"), "iqn.2010-01.com.example:host");
    }

    fn policy() -> impl Strategy<Value = LunPolicy> {
        prop_oneof![
            Just(LunPolicy::Sequential),
            Just(LunPolicy::Reverse),
            Just(LunPolicy::Random),
            Just(LunPolicy::VolumeId),
        ]
    }

    proptest! {
        #[test]
        fn prop_luns_unique_and_in_range(
            ids in proptest::collection::btree_set(1u64..20000, 0..64),
            policy in policy(),
            min in 0u32..=MAX_LUN,
            width in 0u32..=MAX_LUN,
        ) {
            let ids: Vec<u64> = ids.into_iter().collect();
            let max = min.saturating_add(width).min(MAX_LUN);
            if let Ok(plan) = plan_lun_assignments(&ids, policy, min, max) {
                prop_assert_eq!(plan.len(), ids.len());
                let mut seen = HashSet::new();
                for assignment in &plan {
                    prop_assert!(assignment.lun <= MAX_LUN);
                    prop_assert!(seen.insert(assignment.lun));
                }
            }
        }
    }
}
