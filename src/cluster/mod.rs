//! Cluster entities and the operations on them.
//!
//! [`Cluster`] is the entry point: it owns the typed API client for one
//! management VIP plus the configuration that governs polling and fan-out.
//! Entity operations live in the submodules as further `impl Cluster`
//! blocks. Every listing is a snapshot of the moment it was fetched.

pub mod account;
pub mod drives;
pub mod network;
pub mod node;
pub mod pairing;
pub mod volgroup;
pub mod volume;

pub use drives::{DriveFilter, DriveState, DriveType};
pub use network::VlanSpec;
pub use node::ClusterNode;
pub use volgroup::{plan_lun_assignments, LunPolicy, MAX_LUN};
pub use volume::VolumeSearch;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::types::{AsyncResult, ClusterCapacity, ClusterFullThreshold, ClusterInfo, Service};
use crate::api::{ApiClient, ApiVersion, Endpoint, HttpTransport, Transport};
use crate::config::{Config, PollConfig};
use crate::error::{Error, Result};
use crate::retry::{poll_until, PollSpec};
use crate::util::humanize_decimal;

/// Whether a create found the object already there, or a delete found it
/// already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Changed(T),
    Unchanged(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Changed(v) | Outcome::Unchanged(v) => v,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Changed(_))
    }
}

/// A storage cluster reached through its management VIP.
#[derive(Clone)]
pub struct Cluster {
    mvip: String,
    api: ApiClient,
    config: Arc<Config>,
}

impl Cluster {
    /// Cluster reached over HTTPS with basic auth.
    pub fn connect(mvip: &str, username: &str, password: &str, config: Arc<Config>) -> Result<Self> {
        let transport = HttpTransport::new(Endpoint::cluster(mvip), username, password, &config.api)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Cluster on an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        let mvip = transport.endpoint().host.clone();
        Self {
            mvip,
            api: ApiClient::new(transport),
            config,
        }
    }

    pub fn mvip(&self) -> &str {
        &self.mvip
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn poll(&self) -> &PollConfig {
        &self.config.poll
    }

    /// Highest API version the cluster supports; fetched once.
    pub async fn api_version(&self) -> Result<ApiVersion> {
        self.api.version().await
    }

    pub async fn info(&self) -> Result<ClusterInfo> {
        self.api.get_cluster_info().await
    }

    pub async fn capacity(&self) -> Result<ClusterCapacity> {
        self.api.get_cluster_capacity().await
    }

    pub async fn used_space(&self) -> Result<u64> {
        Ok(self.capacity().await?.used_space)
    }

    /// Fullness thresholds, asked of the cluster when it can answer.
    ///
    /// Clusters before 8.0 have no `GetClusterFullThreshold`; for those the
    /// totals come from the capacity record and the stage thresholds stay 0.
    pub async fn full_threshold(&self) -> Result<ClusterFullThreshold> {
        if self.api_version().await? >= ApiVersion::V8_0 {
            return self.api.get_cluster_full_threshold().await;
        }
        let capacity = self.capacity().await?;
        Ok(ClusterFullThreshold {
            sum_total_cluster_bytes: capacity.max_used_space,
            sum_used_cluster_bytes: capacity.used_space,
            ..Default::default()
        })
    }

    /// Wait until the cluster has at least `target` bytes used.
    pub async fn wait_for_fullness(&self, target: u64, timeout: Duration) -> Result<u64> {
        const REPORT_STEP: u64 = 10 * 1000 * 1000 * 1000;
        let last_reported = AtomicU64::new(u64::MAX);
        let spec = PollSpec::new(self.poll().fullness_interval, timeout);

        poll_until("cluster fullness", spec, || {
            let last_reported = &last_reported;
            async move {
                let used = self.used_space().await?;
                let previous = last_reported.load(Ordering::Relaxed);
                if previous == u64::MAX || used.abs_diff(previous) > REPORT_STEP {
                    info!("  Cluster used space is {}B", humanize_decimal(used as i64, 1, Some("G")));
                    last_reported.store(used, Ordering::Relaxed);
                }
                Ok((used >= target).then_some(used))
            }
        })
        .await
    }

    /// Poll an async handle until the cluster reports it complete.
    pub async fn wait_for_async_handle(&self, handle: u64, timeout: Duration) -> Result<AsyncResult> {
        let spec = PollSpec::new(self.poll().async_interval, timeout);
        let result = poll_until(&format!("async handle {}", handle), spec, || async move {
            let result = self.api.get_async_result(handle).await?;
            Ok(result.is_complete().then_some(result))
        })
        .await?;

        if !result.error.is_null() {
            let name = result.error.get("name").and_then(|v| v.as_str()).unwrap_or("xAsyncError");
            let message = result
                .error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("<empty message>");
            return Err(Error::api(name, message, 500));
        }
        debug!("Async handle {} complete", handle);
        Ok(result)
    }

    /// Codes of the faults currently open on the cluster.
    pub async fn current_fault_codes(&self) -> Result<BTreeSet<String>> {
        let faults = self.api.list_cluster_faults(true).await?;
        Ok(faults.into_iter().map(|f| f.code).collect())
    }

    pub async fn master_node_id(&self) -> Result<u64> {
        self.api.get_cluster_master_node_id().await
    }

    /// Services sorted by ID, optionally only those of one type.
    pub async fn list_services(&self, service_type: Option<&str>) -> Result<Vec<Service>> {
        let mut services = self.api.list_services().await?;
        if let Some(wanted) = service_type {
            services.retain(|s| s.service_type == wanted);
        }
        services.sort_by_key(|s| s.service_id);
        Ok(services)
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster").field("mvip", &self.mvip).finish()
    }
}

/// Case-insensitive name comparison used for accounts and groups.
pub(crate) fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
