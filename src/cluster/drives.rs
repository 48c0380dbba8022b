//! Drive lifecycle: listing, adding, removing and the health gates.

use std::time::Duration;
use tracing::{debug, info};

use super::Cluster;
use crate::api::types::Drive;
use crate::error::{Error, Result};
use crate::events::SyncKind;
use crate::retry::{poll_until, PollSpec};

/// Drive status to filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DriveState {
    #[default]
    Any,
    Active,
    Available,
    Failed,
    Removing,
}

impl DriveState {
    pub fn matches(&self, status: &str) -> bool {
        match self {
            DriveState::Any => true,
            DriveState::Active => status == "active",
            DriveState::Available => status == "available",
            DriveState::Failed => status == "failed",
            DriveState::Removing => status == "removing",
        }
    }
}

/// Drive type to filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DriveType {
    #[default]
    Any,
    Block,
    /// Slice (metadata) drives
    Slice,
}

impl DriveType {
    pub fn matches(&self, drive_type: &str) -> bool {
        match self {
            DriveType::Any => true,
            DriveType::Block => drive_type == "block",
            DriveType::Slice => drive_type == "volume",
        }
    }
}

/// Which drives a listing should return.
#[derive(Debug, Clone, Default)]
pub struct DriveFilter {
    pub state: DriveState,
    pub drive_type: DriveType,
    pub node_id: Option<u64>,
}

impl DriveFilter {
    pub fn state(state: DriveState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn on_node(mut self, node_id: Option<u64>) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn matches(&self, drive: &Drive) -> bool {
        self.state.matches(&drive.status)
            && self.drive_type.matches(&drive.drive_type)
            && self.node_id.map_or(true, |id| drive.node_id == id)
    }
}

/// Statuses a drive may be in without the cluster being unhealthy.
const HEALTHY_STATUSES: [&str; 2] = ["active", "available"];

/// Count the drives that are not in a healthy status.
pub fn unhealthy_drives(drives: &[Drive]) -> Vec<&Drive> {
    drives
        .iter()
        .filter(|d| !HEALTHY_STATUSES.contains(&d.status.as_str()))
        .collect()
}

impl Cluster {
    pub async fn list_drives(&self, filter: &DriveFilter) -> Result<Vec<Drive>> {
        let mut drives: Vec<Drive> = self
            .api()
            .list_drives()
            .await?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        drives.sort_by_key(|d| d.drive_id);
        Ok(drives)
    }

    pub async fn list_available_drives(&self, node_id: Option<u64>) -> Result<Vec<Drive>> {
        self.list_drives(&DriveFilter::state(DriveState::Available).on_node(node_id))
            .await
    }

    /// Add the given drives and wait for the cluster to finish the add.
    pub async fn add_drives(&self, drive_ids: &[u64], wait_for_sync: bool) -> Result<()> {
        info!("Adding {} drives to cluster", drive_ids.len());
        let handle = self.api().add_drives(drive_ids).await?;
        self.wait_for_async_handle(handle, self.drive_add_timeout(drive_ids.len()))
            .await?;
        if wait_for_sync {
            self.wait_for_data_sync().await?;
        }
        Ok(())
    }

    /// Add every available drive. Returns how many were added.
    pub async fn add_available_drives(&self, wait_for_sync: bool) -> Result<usize> {
        let drives = self.list_available_drives(None).await?;
        if drives.is_empty() {
            info!("There are no available drives to add");
            return Ok(0);
        }
        let ids: Vec<u64> = drives.iter().map(|d| d.drive_id).collect();
        self.add_drives(&ids, wait_for_sync).await?;
        Ok(ids.len())
    }

    /// Remove drives and wait for the cluster to finish the removal.
    pub async fn remove_drives(&self, drive_ids: &[u64], wait_for_sync: bool) -> Result<()> {
        info!("Removing {} drives from cluster", drive_ids.len());
        let handle = self.api().remove_drives(drive_ids).await?;
        self.wait_for_async_handle(handle, self.drive_add_timeout(drive_ids.len()))
            .await?;
        if wait_for_sync {
            self.wait_for_data_sync().await?;
        }
        Ok(())
    }

    /// Wait for slices and then bins to finish syncing.
    async fn wait_for_data_sync(&self) -> Result<()> {
        let timeout = self.poll().sync_timeout;
        self.wait_for_sync(SyncKind::Slice, timeout).await?;
        self.wait_for_sync(SyncKind::Bin, timeout).await
    }

    fn drive_add_timeout(&self, count: usize) -> Duration {
        self.poll().async_timeout + Duration::from_secs(10 * count as u64)
    }

    /// Wait until enough drives are available.
    ///
    /// With `count` the target is that many drives anywhere; without it the
    /// target is the expected drive count of `node_id`.
    pub async fn wait_for_available_drives(
        &self,
        count: Option<usize>,
        node_id: Option<u64>,
        timeout: Duration,
    ) -> Result<usize> {
        let target = match (count, node_id) {
            (Some(count), _) => count,
            (None, Some(node_id)) => {
                let node = self.find_node_by_id(node_id).await?;
                self.api().get_drive_config(&node.mip).await?.num_total_expected as usize
            }
            (None, None) => return Err(Error::argument("Either a drive count or a node must be given")),
        };

        info!("Waiting for {} available drives", target);
        let spec = PollSpec::new(self.poll().drive_interval, timeout);
        poll_until("available drives", spec, || async move {
            let available = self.list_available_drives(node_id).await?.len();
            debug!("{} of {} drives available", available, target);
            Ok((available >= target).then_some(available))
        })
        .await
    }

    /// Sum of the expected drive counts of every active node.
    pub async fn expected_drive_count(&self) -> Result<usize> {
        let mut total = 0;
        for node in self.list_active_nodes().await? {
            total += self.api().get_drive_config(&node.mip).await?.num_total_expected as usize;
        }
        Ok(total)
    }

    /// Wait until every expected drive is present and none is unhealthy.
    pub async fn wait_for_healthy_drives(&self, timeout: Duration) -> Result<usize> {
        let expected = self.expected_drive_count().await?;
        info!("Waiting for {} healthy drives", expected);

        let spec = PollSpec::new(self.poll().drive_interval, timeout);
        poll_until("healthy drives", spec, || async move {
            let drives = self.api().list_drives().await?;
            let unhealthy = unhealthy_drives(&drives);
            for drive in &unhealthy {
                debug!("Drive {} on node {} is {}", drive.drive_id, drive.node_id, drive.status);
            }
            Ok((drives.len() >= expected && unhealthy.is_empty()).then_some(drives.len()))
        })
        .await
    }
}
