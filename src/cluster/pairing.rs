//! Replication pairing between two clusters.

use tracing::info;

use super::{same_name, Cluster, Outcome};
use crate::api::types::ClusterPair;
use crate::error::{Error, Result};

/// Pick a pair by ID, UUID, remote MVIP or remote cluster name.
pub fn select_pair<'a>(pairs: &'a [ClusterPair], key: &str) -> Option<&'a ClusterPair> {
    let id = key.parse::<u64>().ok();
    pairs.iter().find(|p| {
        Some(p.cluster_pair_id) == id
            || p.cluster_pair_uuid.eq_ignore_ascii_case(key)
            || p.mvip == key
            || same_name(&p.cluster_name, key)
    })
}

impl Cluster {
    /// Begin pairing; returns the key to hand to the other cluster.
    pub async fn start_pairing(&self) -> Result<String> {
        info!("Starting cluster pairing on {}", self.mvip());
        Ok(self.api().start_cluster_pairing().await?.cluster_pairing_key)
    }

    /// Pair this cluster with `remote`. Already paired is success unless `strict`.
    pub async fn pair_with(&self, remote: &Cluster, strict: bool) -> Result<Outcome<Option<u64>>> {
        if let Some(existing) = self.find_pair(remote.mvip()).await? {
            if strict {
                return Err(Error::other(format!("Clusters {} and {} are already paired", self.mvip(), remote.mvip())));
            }
            return Ok(Outcome::Unchanged(Some(existing.cluster_pair_id)));
        }
        let key = self.start_pairing().await?;
        remote.complete_pairing(&key, strict).await
    }

    /// Finish a pairing started on the other cluster.
    pub async fn complete_pairing(&self, key: &str, strict: bool) -> Result<Outcome<Option<u64>>> {
        info!("Completing cluster pairing on {}", self.mvip());
        match self.api().complete_cluster_pairing(key).await {
            Ok(id) => Ok(Outcome::Changed(Some(id))),
            Err(e) if !strict && e.is_api_error(&["xPairingAlreadyExists"]) => {
                info!("Clusters are already paired");
                Ok(Outcome::Unchanged(None))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_pairs(&self) -> Result<Vec<ClusterPair>> {
        self.api().list_cluster_pairs().await
    }

    pub async fn find_pair(&self, key: &str) -> Result<Option<ClusterPair>> {
        let pairs = self.list_pairs().await?;
        Ok(select_pair(&pairs, key).cloned())
    }

    /// Remove a pair; a missing one is success unless `strict`.
    pub async fn delete_pair(&self, key: &str, strict: bool) -> Result<Outcome<Option<ClusterPair>>> {
        let Some(pair) = self.find_pair(key).await? else {
            if strict {
                return Err(Error::unknown(format!("Could not find cluster pair {}", key)));
            }
            return Ok(Outcome::Unchanged(None));
        };
        info!("Removing cluster pair {} ({})", pair.cluster_pair_id, pair.cluster_name);
        self.api().remove_cluster_pair(pair.cluster_pair_id).await?;
        Ok(Outcome::Changed(Some(pair)))
    }
}
