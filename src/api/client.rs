//! Typed wrappers, one per API method.
//!
//! Payload differences between API versions are settled here so callers
//! never branch on the cluster version themselves.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::transport::Transport;
use super::types::*;
use super::{ApiVersion, Endpoint};
use crate::error::{Error, Result};

/// Parameters for a new volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVolume {
    pub name: String,
    pub total_size: u64,
    #[serde(rename = "accountID")]
    pub account_id: u64,
    pub enable512e: bool,
    pub qos: Qos,
}

/// Fields to change on an existing volume. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeChanges {
    #[serde(rename = "volumeID")]
    pub volume_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(rename = "accountID", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<VolumeAccess>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
}

impl VolumeChanges {
    pub fn new(volume_id: u64) -> Self {
        Self {
            volume_id,
            ..Default::default()
        }
    }
}

/// Parameters for `CloneVolume`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequest {
    #[serde(rename = "volumeID")]
    pub volume_id: u64,
    pub name: String,
    pub access: VolumeAccess,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_size: Option<u64>,
    #[serde(rename = "newAccountID", skip_serializing_if = "Option::is_none")]
    pub new_account_id: Option<u64>,
}

/// Parameters for `AddVirtualNetwork`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVirtualNetwork {
    pub virtual_network_tag: u32,
    pub name: String,
    pub address_blocks: Vec<AddressBlock>,
    pub netmask: String,
    pub svip: String,
    pub namespace: bool,
}

/// Typed access to the cluster API.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    version: Arc<OnceCell<ApiVersion>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            version: Arc::new(OnceCell::new()),
        }
    }

    /// Client that skips version negotiation and always uses `version`.
    pub fn with_version(transport: Arc<dyn Transport>, version: ApiVersion) -> Self {
        Self {
            transport,
            version: Arc::new(OnceCell::new_with(Some(version))),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    /// Highest API version the cluster supports, asked once and then cached.
    pub async fn version(&self) -> Result<ApiVersion> {
        self.version
            .get_or_try_init(|| get_highest_api_version(self.transport.as_ref(), None))
            .await
            .copied()
    }

    /// Call `method` at the negotiated version.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let version = self.version().await?;
        self.transport.call(method, params, version).await
    }

    /// Call `method` on a single node.
    pub async fn call_node(&self, node_ip: &str, method: &str, params: Value, version: ApiVersion) -> Result<Value> {
        let endpoint = self.endpoint().to_node(node_ip);
        self.transport.call_at(&endpoint, method, params, version).await
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let result = self.call("ListAccounts", json!({})).await?;
        field(&result, "accounts")
    }

    /// Create an account and return its ID.
    pub async fn add_account(&self, username: &str, initiator_secret: Option<&str>, target_secret: Option<&str>) -> Result<u64> {
        let mut params = json!({ "username": username });
        if let Some(secret) = initiator_secret {
            params["initiatorSecret"] = json!(secret);
        }
        if let Some(secret) = target_secret {
            params["targetSecret"] = json!(secret);
        }
        let result = self.call("AddAccount", params).await?;
        field(&result, "accountID")
    }

    pub async fn remove_account(&self, account_id: u64) -> Result<()> {
        self.call("RemoveAccount", json!({ "accountID": account_id })).await?;
        Ok(())
    }

    // ========================================================================
    // Volumes
    // ========================================================================

    pub async fn list_active_volumes(&self) -> Result<Vec<Volume>> {
        let result = self.call("ListActiveVolumes", json!({})).await?;
        field(&result, "volumes")
    }

    pub async fn list_deleted_volumes(&self) -> Result<Vec<Volume>> {
        let result = self.call("ListDeletedVolumes", json!({})).await?;
        field(&result, "volumes")
    }

    /// Active and deleted volumes owned by an account.
    pub async fn list_volumes_for_account(&self, account_id: u64) -> Result<Vec<Volume>> {
        let result = self.call("ListVolumesForAccount", json!({ "accountID": account_id })).await?;
        field(&result, "volumes")
    }

    pub async fn create_volume(&self, volume: &NewVolume) -> Result<u64> {
        let result = self.call("CreateVolume", serde_json::to_value(volume)?).await?;
        field(&result, "volumeID")
    }

    /// Create several identically shaped volumes, in one call when the cluster
    /// supports it. Returns the new volume IDs.
    pub async fn create_volumes(&self, names: &[String], template: &NewVolume) -> Result<Vec<u64>> {
        if names.len() > 1 && self.version().await? >= ApiVersion::V6_0 {
            let mut params = serde_json::to_value(template)?;
            if let Value::Object(map) = &mut params {
                map.remove("name");
                map.insert("names".into(), json!(names));
            }
            let result = self.call("CreateMultipleVolumes", params).await?;
            return field(&result, "volumeIDs");
        }

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let volume = NewVolume {
                name: name.clone(),
                ..template.clone()
            };
            ids.push(self.create_volume(&volume).await?);
        }
        Ok(ids)
    }

    pub async fn modify_volume(&self, changes: &VolumeChanges) -> Result<Volume> {
        let result = self.call("ModifyVolume", serde_json::to_value(changes)?).await?;
        match result.get("volume") {
            Some(volume) => Ok(Volume::deserialize_from(volume)?),
            None => Ok(Volume {
                volume_id: changes.volume_id,
                ..Default::default()
            }),
        }
    }

    /// Delete volumes, batched on clusters that support it.
    pub async fn delete_volumes(&self, volume_ids: &[u64]) -> Result<()> {
        if volume_ids.is_empty() {
            return Ok(());
        }
        if self.version().await? >= ApiVersion::V9_0 {
            self.call("DeleteVolumes", json!({ "volumeIDs": volume_ids })).await?;
        } else {
            for id in volume_ids {
                self.call("DeleteVolume", json!({ "volumeID": id })).await?;
            }
        }
        Ok(())
    }

    /// Purge deleted volumes, batched on clusters that support it.
    pub async fn purge_deleted_volumes(&self, volume_ids: &[u64]) -> Result<()> {
        if volume_ids.is_empty() {
            return Ok(());
        }
        if self.version().await? >= ApiVersion::V9_0 {
            self.call("PurgeDeletedVolumes", json!({ "volumeIDs": volume_ids })).await?;
        } else {
            for id in volume_ids {
                self.call("PurgeDeletedVolume", json!({ "volumeID": id })).await?;
            }
        }
        Ok(())
    }

    /// Start a clone and return its async handle.
    pub async fn clone_volume(&self, request: &CloneRequest) -> Result<u64> {
        let result = self.call("CloneVolume", serde_json::to_value(request)?).await?;
        field(&result, "asyncHandle")
    }

    pub async fn get_async_result(&self, handle: u64) -> Result<AsyncResult> {
        let result = self
            .call("GetAsyncResult", json!({ "asyncHandle": handle, "keepResult": true }))
            .await?;
        Ok(AsyncResult::deserialize_from(&result)?)
    }

    // ========================================================================
    // Volume access groups
    // ========================================================================

    pub async fn list_volume_access_groups(&self) -> Result<Vec<VolumeAccessGroup>> {
        let result = self.call("ListVolumeAccessGroups", json!({})).await?;
        field(&result, "volumeAccessGroups")
    }

    pub async fn create_volume_access_group(&self, name: &str, initiators: &[String], volumes: &[u64]) -> Result<u64> {
        let mut params = json!({ "name": name });
        if !initiators.is_empty() {
            params["initiators"] = json!(initiators);
        }
        if !volumes.is_empty() {
            params["volumes"] = json!(volumes);
        }
        let result = self.call("CreateVolumeAccessGroup", params).await?;
        field(&result, "volumeAccessGroupID")
    }

    pub async fn delete_volume_access_group(&self, group_id: u64) -> Result<()> {
        self.call("DeleteVolumeAccessGroup", json!({ "volumeAccessGroupID": group_id }))
            .await?;
        Ok(())
    }

    /// Replace a group's initiators (as iSCSI and FC lists), volume list, or
    /// both. From 7.0 the FC list is also sent on its own.
    pub async fn modify_volume_access_group(
        &self,
        group_id: u64,
        initiators: Option<(&[String], &[String])>,
        volumes: Option<&[u64]>,
    ) -> Result<()> {
        let mut params = json!({ "volumeAccessGroupID": group_id });
        if let Some((iscsi, fc)) = initiators {
            let all: Vec<&String> = iscsi.iter().chain(fc).collect();
            params["initiators"] = json!(all);
            if self.version().await? >= ApiVersion::V7_0 {
                params["fibreChannelInitiators"] = json!(fc);
            }
        }
        if let Some(volumes) = volumes {
            params["volumes"] = json!(volumes);
        }
        self.call("ModifyVolumeAccessGroup", params).await?;
        Ok(())
    }

    /// Set LUN numbers. Clusters before 7.0 name the field `logicalUnitNumber`.
    pub async fn modify_lun_assignments(&self, group_id: u64, assignments: &[LunAssignment]) -> Result<()> {
        let lun_field = if self.version().await? >= ApiVersion::V7_0 {
            "lun"
        } else {
            "logicalUnitNumber"
        };
        let assignments: Vec<Value> = assignments
            .iter()
            .map(|a| {
                let mut entry = serde_json::Map::new();
                entry.insert("volumeID".into(), json!(a.volume_id));
                entry.insert(lun_field.into(), json!(a.lun));
                Value::Object(entry)
            })
            .collect();
        self.call(
            "ModifyVolumeAccessGroupLunAssignments",
            json!({ "volumeAccessGroupID": group_id, "lunAssignments": assignments }),
        )
        .await?;
        Ok(())
    }

    // ========================================================================
    // Nodes and drives
    // ========================================================================

    pub async fn list_active_nodes(&self) -> Result<Vec<Node>> {
        let result = self.call("ListActiveNodes", json!({})).await?;
        field(&result, "nodes")
    }

    pub async fn list_pending_nodes(&self) -> Result<Vec<PendingNode>> {
        let result = self.call("ListPendingNodes", json!({})).await?;
        field(&result, "pendingNodes")
    }

    pub async fn list_all_nodes(&self) -> Result<AllNodes> {
        let result = self.call("ListAllNodes", json!({})).await?;
        Ok(AllNodes::deserialize_from(&result)?)
    }

    pub async fn add_nodes(&self, pending_node_ids: &[u64], auto_install: bool) -> Result<()> {
        self.call(
            "AddNodes",
            json!({ "pendingNodes": pending_node_ids, "autoInstall": auto_install }),
        )
        .await?;
        Ok(())
    }

    pub async fn remove_nodes(&self, node_ids: &[u64]) -> Result<()> {
        self.call("RemoveNodes", json!({ "nodes": node_ids })).await?;
        Ok(())
    }

    pub async fn list_drives(&self) -> Result<Vec<Drive>> {
        let result = self.call("ListDrives", json!({})).await?;
        field(&result, "drives")
    }

    /// Add drives to the cluster and return the async handle.
    pub async fn add_drives(&self, drive_ids: &[u64]) -> Result<u64> {
        let drives: Vec<Value> = drive_ids
            .iter()
            .map(|id| json!({ "driveID": id, "type": "automatic" }))
            .collect();
        let result = self.call("AddDrives", json!({ "drives": drives })).await?;
        field(&result, "asyncHandle")
    }

    /// Remove drives from the cluster and return the async handle.
    pub async fn remove_drives(&self, drive_ids: &[u64]) -> Result<u64> {
        let result = self.call("RemoveDrives", json!({ "drives": drive_ids })).await?;
        field(&result, "asyncHandle")
    }

    pub async fn get_drive_config(&self, node_ip: &str) -> Result<DriveConfig> {
        let result = self
            .call_node(node_ip, "GetDriveConfig", json!({}), ApiVersion::V6_0)
            .await?;
        field(&result, "driveConfig")
    }

    pub async fn list_network_interfaces(&self, node_ip: &str) -> Result<Vec<NetworkInterface>> {
        let result = self
            .call_node(node_ip, "ListNetworkInterfaces", json!({}), ApiVersion::V7_0)
            .await?;
        field(&result, "interfaces")
    }

    /// Hostname a node reports in its cluster config.
    pub async fn get_node_hostname(&self, node_ip: &str) -> Result<String> {
        let result = self
            .call_node(node_ip, "GetClusterConfig", json!({}), ApiVersion::V5_0)
            .await?;
        result
            .pointer("/cluster/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::transport(node_ip, "GetClusterConfig response has no cluster name"))
    }

    // ========================================================================
    // Cluster
    // ========================================================================

    pub async fn get_cluster_info(&self) -> Result<ClusterInfo> {
        let result = self.call("GetClusterInfo", json!({})).await?;
        field(&result, "clusterInfo")
    }

    pub async fn get_cluster_capacity(&self) -> Result<ClusterCapacity> {
        let result = self.call("GetClusterCapacity", json!({})).await?;
        field(&result, "clusterCapacity")
    }

    pub async fn get_cluster_full_threshold(&self) -> Result<ClusterFullThreshold> {
        let result = self.call("GetClusterFullThreshold", json!({})).await?;
        Ok(ClusterFullThreshold::deserialize_from(&result)?)
    }

    pub async fn get_limits(&self) -> Result<Value> {
        self.call("GetLimits", json!({})).await
    }

    pub async fn get_cluster_master_node_id(&self) -> Result<u64> {
        let result = self.call("GetClusterMasterNodeID", json!({})).await?;
        field(&result, "nodeID")
    }

    pub async fn list_services(&self) -> Result<Vec<Service>> {
        let result = self.call("ListServices", json!({})).await?;
        let entries: Vec<Value> = field(&result, "services")?;
        entries
            .iter()
            .filter_map(|entry| entry.get("service"))
            .map(|service| Ok(Service::deserialize_from(service)?))
            .collect()
    }

    /// Current (unresolved) faults, or every fault when `current_only` is false.
    pub async fn list_cluster_faults(&self, current_only: bool) -> Result<Vec<Fault>> {
        let fault_types = if current_only { "current" } else { "all" };
        let result = self
            .call("ListClusterFaults", json!({ "faultTypes": fault_types }))
            .await?;
        field(&result, "faults")
    }

    pub async fn list_events(&self) -> Result<Vec<RawEvent>> {
        let result = self.call("ListEvents", json!({})).await?;
        field(&result, "events")
    }

    pub async fn start_gc(&self) -> Result<()> {
        self.call("StartGC", json!({})).await?;
        Ok(())
    }

    /// Body of a `/reports/<name>` page.
    pub async fn fetch_report(&self, name: &str) -> Result<String> {
        self.transport.fetch(&format!("/reports/{}", name)).await
    }

    // ========================================================================
    // Virtual networks
    // ========================================================================

    pub async fn list_virtual_networks(&self) -> Result<Vec<VirtualNetwork>> {
        let result = self.call("ListVirtualNetworks", json!({})).await?;
        field(&result, "virtualNetworks")
    }

    pub async fn add_virtual_network(&self, network: &NewVirtualNetwork) -> Result<u64> {
        let result = self
            .call("AddVirtualNetwork", serde_json::to_value(network)?)
            .await?;
        field(&result, "virtualNetworkID")
    }

    pub async fn remove_virtual_network(&self, virtual_network_id: u64) -> Result<()> {
        self.call("RemoveVirtualNetwork", json!({ "virtualNetworkID": virtual_network_id }))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Cluster pairing
    // ========================================================================

    pub async fn start_cluster_pairing(&self) -> Result<StartPairingInfo> {
        let result = self.call("StartClusterPairing", json!({})).await?;
        Ok(StartPairingInfo::deserialize_from(&result)?)
    }

    /// Finish pairing with the key from the other cluster; returns the pair ID.
    pub async fn complete_cluster_pairing(&self, key: &str) -> Result<u64> {
        let result = self.call("CompleteClusterPairing", json!({ "key": key })).await?;
        field(&result, "clusterPairID")
    }

    pub async fn list_cluster_pairs(&self) -> Result<Vec<ClusterPair>> {
        let result = self.call("ListClusterPairs", json!({})).await?;
        field(&result, "clusterPairs")
    }

    pub async fn remove_cluster_pair(&self, cluster_pair_id: u64) -> Result<()> {
        self.call("RemoveClusterPair", json!({ "clusterPairID": cluster_pair_id }))
            .await?;
        Ok(())
    }
}

/// Deserialize a whole result object into a record.
trait FromResult: Sized {
    fn deserialize_from(value: &Value) -> serde_json::Result<Self>;
}

impl<T: serde::de::DeserializeOwned> FromResult for T {
    fn deserialize_from(value: &Value) -> serde_json::Result<Self> {
        T::deserialize(value)
    }
}

/// Ask an endpoint for the highest API version it supports.
///
/// `GetAPI` is sent at version 1.0. A response without `supportedVersions`
/// means a pre-5.0 cluster (4.0); a list with nothing parseable means 5.0.
pub async fn get_highest_api_version(transport: &dyn Transport, endpoint: Option<&Endpoint>) -> Result<ApiVersion> {
    let result = match endpoint {
        Some(endpoint) => transport.call_at(endpoint, "GetAPI", json!({}), ApiVersion::V1_0).await?,
        None => transport.call("GetAPI", json!({}), ApiVersion::V1_0).await?,
    };

    let Some(supported) = result.get("supportedVersions").and_then(Value::as_array) else {
        return Ok(ApiVersion::V4_0);
    };
    let version = supported
        .iter()
        .filter_map(ApiVersion::from_value)
        .max()
        .unwrap_or(ApiVersion::V5_0);
    debug!("{} supports API version {}", transport.endpoint(), version);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        Rpc {}

        #[async_trait]
        impl Transport for Rpc {
            fn endpoint(&self) -> &Endpoint;
            async fn call_at(&self, endpoint: &Endpoint, method: &str, params: Value, version: ApiVersion) -> Result<Value>;
            async fn fetch(&self, path: &str) -> Result<String>;
        }
    }

    fn rpc() -> MockRpc {
        let mut rpc = MockRpc::new();
        rpc.expect_endpoint().return_const(Endpoint::cluster("10.1.1.1"));
        rpc
    }

    #[tokio::test]
    async fn test_version_negotiation() {
        let mut rpc = rpc();
        rpc.expect_call_at()
            .withf(|_, method, _, version| method == "GetAPI" && *version == ApiVersion::V1_0)
            .times(1)
            .returning(|_, _, _, _| Ok(json!({"supportedVersions": ["1.0", "8.0", "9.0", "bogus"]})));
        let client = ApiClient::new(Arc::new(rpc));
        assert_eq!(client.version().await.unwrap(), ApiVersion::V9_0);
        // cached
        assert_eq!(client.version().await.unwrap(), ApiVersion::V9_0);
    }

    #[tokio::test]
    async fn test_version_fallbacks() {
        let mut rpc = rpc();
        rpc.expect_call_at().returning(|_, _, _, _| Ok(json!({"currentVersion": "4.0"})));
        assert_eq!(get_highest_api_version(&rpc, None).await.unwrap(), ApiVersion::V4_0);

        let mut rpc = self::rpc();
        rpc.expect_call_at().returning(|_, _, _, _| Ok(json!({"supportedVersions": ["x"]})));
        assert_eq!(get_highest_api_version(&rpc, None).await.unwrap(), ApiVersion::V5_0);
    }

    #[tokio::test]
    async fn test_lun_field_follows_version() {
        for (version, lun_field) in [(ApiVersion::V9_0, "lun"), (ApiVersion::V6_0, "logicalUnitNumber")] {
            let mut rpc = rpc();
            rpc.expect_call_at()
                .withf(move |_, method, params, _| {
                    method == "ModifyVolumeAccessGroupLunAssignments"
                        && params["lunAssignments"][0][lun_field] == json!(4)
                        && params["volumeAccessGroupID"] == json!(2)
                })
                .times(1)
                .returning(|_, _, _, _| Ok(json!({})));
            let client = ApiClient::with_version(Arc::new(rpc), version);
            client
                .modify_lun_assignments(2, &[LunAssignment { volume_id: 11, lun: 4 }])
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_delete_batches_on_new_clusters() {
        let mut rpc = rpc();
        rpc.expect_call_at()
            .withf(|_, method, params, _| method == "DeleteVolumes" && params["volumeIDs"] == json!([1, 2, 3]))
            .times(1)
            .returning(|_, _, _, _| Ok(json!({})));
        let client = ApiClient::with_version(Arc::new(rpc), ApiVersion::V9_0);
        client.delete_volumes(&[1, 2, 3]).await.unwrap();

        let mut rpc = self::rpc();
        rpc.expect_call_at()
            .withf(|_, method, _, _| method == "DeleteVolume")
            .times(3)
            .returning(|_, _, _, _| Ok(json!({})));
        let client = ApiClient::with_version(Arc::new(rpc), ApiVersion::V8_0);
        client.delete_volumes(&[1, 2, 3]).await.unwrap();
    }

    #[tokio::test]
    async fn test_node_calls_use_node_port() {
        let mut rpc = rpc();
        rpc.expect_call_at()
            .withf(|endpoint, method, _, version| {
                endpoint.port == Some(442) && endpoint.host == "10.1.1.5" && method == "GetDriveConfig" && *version == ApiVersion::V6_0
            })
            .returning(|_, _, _, _| Ok(json!({"driveConfig": {"numTotalExpected": 11, "numBlockExpected": 9, "numSliceExpected": 2}})));
        let client = ApiClient::with_version(Arc::new(rpc), ApiVersion::V9_0);
        let config = client.get_drive_config("10.1.1.5").await.unwrap();
        assert_eq!(config.num_total_expected, 11);
    }

    #[tokio::test]
    async fn test_modify_volume_skips_unset_fields() {
        let mut rpc = rpc();
        rpc.expect_call_at()
            .withf(|_, method, params, _| method == "ModifyVolume" && *params == json!({"volumeID": 5, "accountID": 9}))
            .returning(|_, _, _, _| Ok(json!({})));
        let client = ApiClient::with_version(Arc::new(rpc), ApiVersion::V9_0);
        let changes = VolumeChanges {
            account_id: Some(9),
            ..VolumeChanges::new(5)
        };
        assert_eq!(client.modify_volume(&changes).await.unwrap().volume_id, 5);
    }
}
