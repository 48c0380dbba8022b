//! Records returned by the cluster API.
//!
//! Only the fields the library reads are declared; everything else in a
//! response is ignored on deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::util::normalize_wwn;

/// Deserialize a typed record out of a member of a result object.
pub fn field<T: serde::de::DeserializeOwned>(result: &Value, key: &str) -> Result<T> {
    let value = result
        .get(key)
        .ok_or_else(|| Error::transport("cluster", format!("response is missing '{}'", key)))?;
    Ok(T::deserialize(value)?)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(rename = "accountID")]
    pub account_id: u64,
    pub username: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub initiator_secret: Option<String>,
    #[serde(default)]
    pub target_secret: Option<String>,
    /// IDs of active and deleted volumes owned by the account
    #[serde(default)]
    pub volumes: Vec<u64>,
    #[serde(default)]
    pub attributes: Value,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.account_id)
    }
}

/// Quality-of-service settings. Zero means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    #[serde(rename = "minIOPS", default)]
    pub min_iops: u64,
    #[serde(rename = "maxIOPS", default)]
    pub max_iops: u64,
    #[serde(rename = "burstIOPS", default)]
    pub burst_iops: u64,
}

/// Volume access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
#[value(rename_all = "camelCase")]
pub enum VolumeAccess {
    ReadWrite,
    ReadOnly,
    Locked,
    ReplicationTarget,
}

impl VolumeAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeAccess::ReadWrite => "readWrite",
            VolumeAccess::ReadOnly => "readOnly",
            VolumeAccess::Locked => "locked",
            VolumeAccess::ReplicationTarget => "replicationTarget",
        }
    }
}

impl fmt::Display for VolumeAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    #[serde(rename = "volumeID")]
    pub volume_id: u64,
    pub name: String,
    #[serde(rename = "accountID")]
    pub account_id: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub enable512e: bool,
    /// readWrite, readOnly, locked or replicationTarget
    #[serde(default)]
    pub access: String,
    /// active or deleted
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub qos: Qos,
    #[serde(default)]
    pub volume_access_groups: Vec<u64>,
    #[serde(default)]
    pub iqn: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub delete_time: String,
    #[serde(default)]
    pub purge_time: String,
    #[serde(default)]
    pub attributes: Value,
}

impl Volume {
    pub fn is_deleted(&self) -> bool {
        self.status == "deleted"
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.volume_id)
    }
}

/// One volume's LUN inside an access group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LunAssignment {
    #[serde(rename = "volumeID")]
    pub volume_id: u64,
    #[serde(alias = "logicalUnitNumber")]
    pub lun: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAccessGroup {
    #[serde(rename = "volumeAccessGroupID")]
    pub volume_access_group_id: u64,
    pub name: String,
    /// Unified initiator list (IQNs and WWNs together)
    #[serde(default)]
    pub initiators: Vec<String>,
    #[serde(default)]
    pub iscsi_initiators: Vec<String>,
    #[serde(default)]
    pub fibre_channel_initiators: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<u64>,
    #[serde(default, alias = "volumeLunAssignments")]
    pub lun_assignments: Vec<LunAssignment>,
    #[serde(default)]
    pub attributes: Value,
}

impl VolumeAccessGroup {
    /// iSCSI and FC initiators. The separate lists and the unified list are
    /// merged, unified entries are sorted by prefix, and duplicates (by
    /// [`initiator_key`]) are dropped.
    pub fn split_initiators(&self) -> (Vec<String>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut iscsi = Vec::new();
        let mut fc = Vec::new();
        for init in &self.iscsi_initiators {
            if seen.insert(initiator_key(init)) {
                iscsi.push(init.clone());
            }
        }
        for init in &self.fibre_channel_initiators {
            if seen.insert(initiator_key(init)) {
                fc.push(init.clone());
            }
        }
        for init in &self.initiators {
            if !seen.insert(initiator_key(init)) {
                continue;
            }
            if is_iscsi_name(init) {
                iscsi.push(init.clone());
            } else {
                fc.push(init.clone());
            }
        }
        (iscsi, fc)
    }

    /// Every initiator in the group, iSCSI first.
    pub fn all_initiators(&self) -> Vec<String> {
        let (mut iscsi, fc) = self.split_initiators();
        iscsi.extend(fc);
        iscsi
    }
}

impl fmt::Display for VolumeAccessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.volume_access_group_id)
    }
}

/// True for iSCSI qualified names (`iqn.` or `eui.`).
pub fn is_iscsi_name(initiator: &str) -> bool {
    let lower = initiator.to_lowercase();
    lower.starts_with("iqn") || lower.starts_with("eui")
}

/// Comparison key for an initiator: lowercase IQN, or bare lowercase hex WWN.
pub fn initiator_key(initiator: &str) -> String {
    if is_iscsi_name(initiator) {
        initiator.trim().to_lowercase()
    } else {
        normalize_wwn(initiator)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "nodeID")]
    pub node_id: u64,
    #[serde(default)]
    pub name: String,
    /// Management IP
    #[serde(default)]
    pub mip: String,
    /// Cluster IP
    #[serde(default)]
    pub cip: String,
    /// Storage IP
    #[serde(default)]
    pub sip: String,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub platform_info: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNode {
    #[serde(rename = "pendingNodeID")]
    pub pending_node_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mip: String,
    #[serde(default)]
    pub cip: String,
    #[serde(default)]
    pub sip: String,
    #[serde(default)]
    pub software_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllNodes {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pending_nodes: Vec<PendingNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub mtu: u32,
    #[serde(default, rename = "type")]
    pub interface_type: String,
    #[serde(default)]
    pub rx_bytes: Option<u64>,
    #[serde(default)]
    pub tx_bytes: Option<u64>,
}

/// Expected drive counts reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    #[serde(default)]
    pub num_total_expected: u32,
    #[serde(default)]
    pub num_block_expected: u32,
    #[serde(default)]
    pub num_slice_expected: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drive {
    #[serde(rename = "driveID")]
    pub drive_id: u64,
    #[serde(rename = "nodeID")]
    pub node_id: u64,
    /// active, available, failed, removing, erasing
    #[serde(default)]
    pub status: String,
    /// block or volume (slice)
    #[serde(default, rename = "type")]
    pub drive_type: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub slot: i64,
    #[serde(default)]
    pub capacity: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mvip: String,
    #[serde(default)]
    pub svip: String,
    #[serde(default, rename = "uniqueID")]
    pub unique_id: String,
    #[serde(default)]
    pub ensemble: Vec<String>,
    #[serde(default)]
    pub rep_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCapacity {
    #[serde(default)]
    pub used_space: u64,
    #[serde(default)]
    pub max_used_space: u64,
    #[serde(default)]
    pub provisioned_space: u64,
    #[serde(default)]
    pub max_provisioned_space: u64,
    #[serde(default)]
    pub active_block_space: u64,
    #[serde(default)]
    pub unique_blocks_used_space: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFullThreshold {
    #[serde(default)]
    pub stage2_block_threshold_bytes: u64,
    #[serde(default)]
    pub stage3_block_threshold_bytes: u64,
    #[serde(default)]
    pub sum_total_cluster_bytes: u64,
    #[serde(default)]
    pub sum_used_cluster_bytes: u64,
    #[serde(default)]
    pub block_fullness: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault {
    #[serde(default, rename = "clusterFaultID")]
    pub cluster_fault_id: u64,
    pub code: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub resolved: bool,
}

/// One entry of `ListServices`; only the `service` member is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "serviceID")]
    pub service_id: u64,
    /// block, slice, master, transport, ...
    #[serde(default)]
    pub service_type: String,
    #[serde(default, rename = "nodeID")]
    pub node_id: u64,
    #[serde(default, rename = "driveID")]
    pub drive_id: Option<u64>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default, rename = "eventID")]
    pub event_id: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub time_of_report: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default, rename = "serviceID")]
    pub service_id: u64,
    #[serde(default, rename = "nodeID")]
    pub node_id: u64,
    #[serde(default)]
    pub event_info_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBlock {
    pub start: std::net::Ipv4Addr,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetwork {
    #[serde(rename = "virtualNetworkID")]
    pub virtual_network_id: u64,
    pub virtual_network_tag: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub svip: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub address_blocks: Vec<AddressBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPair {
    #[serde(rename = "clusterPairID")]
    pub cluster_pair_id: u64,
    #[serde(default, rename = "clusterPairUUID")]
    pub cluster_pair_uuid: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub mvip: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPairingInfo {
    pub cluster_pairing_key: String,
    #[serde(rename = "clusterPairID")]
    pub cluster_pair_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AsyncResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
}

impl AsyncResult {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}
