//! Shared fixtures for the sfctl integration tests.
//!
//! [`FakeCluster`] answers the JSON-RPC methods sfctl uses from in-memory
//! state, records every call, and can be told to reject modifications of
//! particular volumes. Build a [`Cluster`] on it with [`FakeCluster::cluster`]
//! and run subcommands against it with [`run_command`].
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::{json, Value};

use sfctl::action::{ActionContext, ActionRunner, OutputFormat};
use sfctl::api::types::{
    Account, ClusterFullThreshold, Drive, Fault, LunAssignment, Node, PendingNode, Qos, RawEvent, Volume,
    VolumeAccessGroup,
};
use sfctl::api::{ApiVersion, Endpoint, Transport};
use sfctl::cli::Cli;
use sfctl::cluster::Cluster;
use sfctl::config::{Config, ParallelConfig, PollConfig};
use sfctl::error::{Error, Result};

pub const MVIP: &str = "10.1.1.1";
pub const GB: u64 = 1000 * 1000 * 1000;

// ============================================================================
// Fake cluster state
// ============================================================================

/// Everything the fake cluster knows.
#[derive(Debug, Default)]
pub struct State {
    next_id: u64,
    pub accounts: Vec<Account>,
    pub volumes: Vec<Volume>,
    pub groups: Vec<VolumeAccessGroup>,
    pub drives: Vec<Drive>,
    pub nodes: Vec<Node>,
    pub pending_nodes: Vec<PendingNode>,
    /// Async handles handed out so far
    pub async_handles: u64,
    /// Oldest first; listed newest first like the real cluster
    pub events: Vec<RawEvent>,
    pub faults: Vec<Fault>,
    /// Used-space readings; each capacity call takes one, the last repeats
    pub used_space: VecDeque<u64>,
    pub threshold: ClusterFullThreshold,
    /// Volume IDs whose `ModifyVolume` fails
    pub failing_volumes: HashSet<u64>,
    /// Generation `StartGC` logs a `GCStarted` event for; 0 logs nothing
    pub next_gc_generation: u64,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn account_with_volumes(&self, account: &Account) -> Account {
        Account {
            volumes: self
                .volumes
                .iter()
                .filter(|v| v.account_id == account.account_id)
                .map(|v| v.volume_id)
                .collect(),
            ..account.clone()
        }
    }

    fn volume_mut(&mut self, volume_id: u64) -> Result<&mut Volume> {
        self.volumes
            .iter_mut()
            .find(|v| v.volume_id == volume_id)
            .ok_or_else(|| api_error("xVolumeIDDoesNotExist", format!("VolumeID {} does not exist.", volume_id)))
    }

    fn group_mut(&mut self, group_id: u64) -> Result<&mut VolumeAccessGroup> {
        self.groups
            .iter_mut()
            .find(|g| g.volume_access_group_id == group_id)
            .ok_or_else(|| {
                api_error(
                    "xVolumeAccessGroupIDDoesNotExist",
                    format!("VolumeAccessGroupID {} does not exist.", group_id),
                )
            })
    }

    fn new_volume(&mut self, name: &str, params: &Value) -> u64 {
        let volume_id = self.allocate_id();
        self.volumes.push(Volume {
            volume_id,
            name: name.to_string(),
            account_id: u64_param(params, "accountID"),
            total_size: u64_param(params, "totalSize"),
            enable512e: params["enable512e"].as_bool().unwrap_or(false),
            access: "readWrite".into(),
            status: "active".into(),
            qos: serde_json::from_value(params["qos"].clone()).unwrap_or_default(),
            ..Default::default()
        });
        volume_id
    }

    fn delete_volume(&mut self, volume_id: u64) -> Result<()> {
        self.volume_mut(volume_id)?.status = "deleted".into();
        Ok(())
    }

    fn purge_volume(&mut self, volume_id: u64) -> Result<()> {
        match self.volumes.iter().position(|v| v.volume_id == volume_id && v.is_deleted()) {
            Some(index) => {
                self.volumes.remove(index);
                Ok(())
            }
            None => Err(api_error("xVolumeIDDoesNotExist", format!("VolumeID {} is not deleted.", volume_id))),
        }
    }
}

fn api_error(name: &str, message: impl Into<String>) -> Error {
    Error::api(name, message, 500)
}

fn u64_param(params: &Value, key: &str) -> u64 {
    params[key].as_u64().unwrap_or_default()
}

fn id_list(params: &Value, key: &str) -> Vec<u64> {
    params[key]
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

fn string_list(params: &Value, key: &str) -> Vec<String> {
    params[key]
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

// ============================================================================
// Fake transport
// ============================================================================

/// In-memory stand-in for a cluster's JSON-RPC endpoint.
#[derive(Debug)]
pub struct FakeCluster {
    endpoint: Endpoint,
    version: ApiVersion,
    state: RwLock<State>,
    calls: RwLock<Vec<(String, Value)>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Self::with_version(ApiVersion::V9_0)
    }

    pub fn with_version(version: ApiVersion) -> Arc<Self> {
        Arc::new(Self {
            endpoint: Endpoint::cluster(MVIP),
            version,
            state: RwLock::new(State::default()),
            calls: RwLock::new(Vec::new()),
        })
    }

    /// A [`Cluster`] talking to this fake, with fast polling.
    pub fn cluster(self: &Arc<Self>) -> Cluster {
        Cluster::with_transport(self.clone(), Arc::new(test_config()))
    }

    pub fn state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read()
    }

    /// Every `(method, params)` received, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.read().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.read().iter().filter(|(m, _)| m == method).count()
    }

    /// Calls other than version negotiation.
    pub fn api_calls(&self) -> Vec<String> {
        self.calls
            .read()
            .iter()
            .map(|(m, _)| m.clone())
            .filter(|m| m != "GetAPI")
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    pub fn add_account(&self, username: &str) -> u64 {
        let mut state = self.state.write();
        let account_id = state.allocate_id();
        state.accounts.push(Account {
            account_id,
            username: username.to_string(),
            status: "active".into(),
            ..Default::default()
        });
        account_id
    }

    pub fn add_volume(&self, name: &str, account_id: u64, total_size: u64) -> u64 {
        let mut state = self.state.write();
        state.new_volume(
            name,
            &json!({ "accountID": account_id, "totalSize": total_size, "qos": Qos::default() }),
        )
    }

    /// A volume that was deleted but not purged.
    pub fn add_deleted_volume(&self, name: &str, account_id: u64) -> u64 {
        let volume_id = self.add_volume(name, account_id, GB);
        self.state.write().volumes.iter_mut().for_each(|v| {
            if v.volume_id == volume_id {
                v.status = "deleted".into();
            }
        });
        volume_id
    }

    pub fn add_group(&self, name: &str, initiators: &[&str], volumes: &[u64]) -> u64 {
        let mut state = self.state.write();
        let volume_access_group_id = state.allocate_id();
        state.groups.push(VolumeAccessGroup {
            volume_access_group_id,
            name: name.to_string(),
            initiators: initiators.iter().map(|s| s.to_string()).collect(),
            volumes: volumes.to_vec(),
            ..Default::default()
        });
        volume_access_group_id
    }

    pub fn add_drive(&self, node_id: u64, status: &str) -> u64 {
        let mut state = self.state.write();
        let drive_id = state.allocate_id();
        state.drives.push(Drive {
            drive_id,
            node_id,
            status: status.to_string(),
            drive_type: "block".into(),
            ..Default::default()
        });
        drive_id
    }

    pub fn add_node(&self, mip: &str) -> u64 {
        let mut state = self.state.write();
        let node_id = state.allocate_id();
        state.nodes.push(Node {
            node_id,
            name: format!("node{}", node_id),
            mip: mip.to_string(),
            ..Default::default()
        });
        node_id
    }

    pub fn add_pending_node(&self, mip: &str) -> u64 {
        let mut state = self.state.write();
        let pending_node_id = state.allocate_id();
        state.pending_nodes.push(PendingNode {
            pending_node_id,
            mip: mip.to_string(),
            ..Default::default()
        });
        pending_node_id
    }

    pub fn drive_status(&self, drive_id: u64) -> Option<String> {
        self.state.read().drives.iter().find(|d| d.drive_id == drive_id).map(|d| d.status.clone())
    }

    /// Append an event; `time` is a cluster timestamp such as `2024-05-01T10:00:00Z`.
    pub fn push_event(&self, message: &str, time: &str, service_id: u64, details: Value) {
        let mut state = self.state.write();
        let event_id = state.events.len() as u64 + 1;
        state.events.push(RawEvent {
            event_id,
            message: message.to_string(),
            time_of_report: time.to_string(),
            details,
            service_id,
            ..Default::default()
        });
    }

    pub fn set_used_space(&self, readings: &[u64]) {
        self.state.write().used_space = readings.iter().copied().collect();
    }

    /// Make `StartGC` log generation `generation`, then the ones after it.
    pub fn start_gc_at(&self, generation: u64) {
        self.state.write().next_gc_generation = generation;
    }

    pub fn fail_modify(&self, volume_id: u64) {
        self.state.write().failing_volumes.insert(volume_id);
    }

    pub fn volume(&self, volume_id: u64) -> Option<Volume> {
        self.state.read().volumes.iter().find(|v| v.volume_id == volume_id).cloned()
    }

    pub fn group(&self, name: &str) -> Option<VolumeAccessGroup> {
        self.state.read().groups.iter().find(|g| g.name == name).cloned()
    }

    pub fn account_named(&self, username: &str) -> Option<Account> {
        self.state.read().accounts.iter().find(|a| a.username == username).cloned()
    }

    fn handle(&self, method: &str, params: &Value) -> Result<Value> {
        let mut state = self.state.write();
        let result = match method {
            "GetAPI" => json!({ "currentVersion": self.version, "supportedVersions": ["1.0", self.version] }),
            "GetClusterInfo" => json!({ "clusterInfo": { "name": "fake", "mvip": MVIP, "uniqueID": "fk01" } }),

            "ListAccounts" => {
                let accounts: Vec<Account> = state.accounts.iter().map(|a| state.account_with_volumes(a)).collect();
                json!({ "accounts": accounts })
            }
            "AddAccount" => {
                let username = params["username"].as_str().unwrap_or_default().to_string();
                if state.accounts.iter().any(|a| a.username == username) {
                    return Err(api_error("xDuplicateUsername", format!("Username {} already exists.", username)));
                }
                let account_id = state.allocate_id();
                state.accounts.push(Account {
                    account_id,
                    username,
                    status: "active".into(),
                    initiator_secret: params["initiatorSecret"].as_str().map(str::to_string),
                    target_secret: params["targetSecret"].as_str().map(str::to_string),
                    ..Default::default()
                });
                json!({ "accountID": account_id })
            }
            "RemoveAccount" => {
                let account_id = u64_param(params, "accountID");
                if state.volumes.iter().any(|v| v.account_id == account_id) {
                    return Err(api_error("xAccountHasVolumes", "Account still owns volumes."));
                }
                let before = state.accounts.len();
                state.accounts.retain(|a| a.account_id != account_id);
                if state.accounts.len() == before {
                    return Err(api_error("xAccountIDDoesNotExist", format!("AccountID {} does not exist.", account_id)));
                }
                json!({})
            }

            "ListActiveVolumes" => {
                let volumes: Vec<&Volume> = state.volumes.iter().filter(|v| !v.is_deleted()).collect();
                json!({ "volumes": volumes })
            }
            "ListDeletedVolumes" => {
                let volumes: Vec<&Volume> = state.volumes.iter().filter(|v| v.is_deleted()).collect();
                json!({ "volumes": volumes })
            }
            "ListVolumesForAccount" => {
                let account_id = u64_param(params, "accountID");
                let volumes: Vec<&Volume> = state.volumes.iter().filter(|v| v.account_id == account_id).collect();
                json!({ "volumes": volumes })
            }
            "CreateVolume" => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                json!({ "volumeID": state.new_volume(&name, params) })
            }
            "CreateMultipleVolumes" => {
                let ids: Vec<u64> = string_list(params, "names")
                    .iter()
                    .map(|name| state.new_volume(name, params))
                    .collect();
                json!({ "volumeIDs": ids })
            }
            "ModifyVolume" => {
                let volume_id = u64_param(params, "volumeID");
                if state.failing_volumes.contains(&volume_id) {
                    return Err(api_error("xVolumeBusy", format!("VolumeID {} is busy.", volume_id)));
                }
                let volume = state.volume_mut(volume_id)?;
                if let Some(size) = params["totalSize"].as_u64() {
                    volume.total_size = size;
                }
                if let Some(account_id) = params["accountID"].as_u64() {
                    volume.account_id = account_id;
                }
                if let Some(access) = params["access"].as_str() {
                    volume.access = access.to_string();
                }
                if let Ok(qos) = serde_json::from_value::<Qos>(params["qos"].clone()) {
                    volume.qos = qos;
                }
                json!({ "volume": volume.clone() })
            }
            "DeleteVolume" => {
                state.delete_volume(u64_param(params, "volumeID"))?;
                json!({})
            }
            "DeleteVolumes" => {
                for volume_id in id_list(params, "volumeIDs") {
                    state.delete_volume(volume_id)?;
                }
                json!({})
            }
            "PurgeDeletedVolume" => {
                state.purge_volume(u64_param(params, "volumeID"))?;
                json!({})
            }
            "PurgeDeletedVolumes" => {
                for volume_id in id_list(params, "volumeIDs") {
                    state.purge_volume(volume_id)?;
                }
                json!({})
            }

            "ListVolumeAccessGroups" => json!({ "volumeAccessGroups": state.groups }),
            "CreateVolumeAccessGroup" => {
                let group_id = state.allocate_id();
                state.groups.push(VolumeAccessGroup {
                    volume_access_group_id: group_id,
                    name: params["name"].as_str().unwrap_or_default().to_string(),
                    initiators: string_list(params, "initiators"),
                    volumes: id_list(params, "volumes"),
                    ..Default::default()
                });
                json!({ "volumeAccessGroupID": group_id })
            }
            "DeleteVolumeAccessGroup" => {
                let group_id = u64_param(params, "volumeAccessGroupID");
                state.group_mut(group_id)?;
                state.groups.retain(|g| g.volume_access_group_id != group_id);
                json!({})
            }
            "ModifyVolumeAccessGroup" => {
                let group = state.group_mut(u64_param(params, "volumeAccessGroupID"))?;
                if params.get("initiators").is_some() {
                    group.initiators = string_list(params, "initiators");
                }
                if params.get("fibreChannelInitiators").is_some() {
                    group.fibre_channel_initiators = string_list(params, "fibreChannelInitiators");
                }
                if params.get("volumes").is_some() {
                    group.volumes = id_list(params, "volumes");
                }
                json!({})
            }
            "ModifyVolumeAccessGroupLunAssignments" => {
                let assignments: Vec<LunAssignment> = serde_json::from_value(params["lunAssignments"].clone())?;
                state.group_mut(u64_param(params, "volumeAccessGroupID"))?.lun_assignments = assignments;
                json!({})
            }

            "GetClusterCapacity" => {
                let used = if state.used_space.len() > 1 {
                    state.used_space.pop_front().unwrap_or_default()
                } else {
                    state.used_space.front().copied().unwrap_or_default()
                };
                json!({ "clusterCapacity": { "usedSpace": used, "maxUsedSpace": 1000 * GB } })
            }
            "GetClusterFullThreshold" => serde_json::to_value(&state.threshold)?,
            "ListClusterFaults" => json!({ "faults": state.faults }),
            "ListDrives" => json!({ "drives": state.drives }),
            "AddDrives" | "RemoveDrives" => {
                let status = if method == "AddDrives" { "active" } else { "available" };
                let ids: Vec<u64> = params["drives"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|d| d.get("driveID").unwrap_or(d).as_u64())
                    .collect();
                for drive in state.drives.iter_mut().filter(|d| ids.contains(&d.drive_id)) {
                    drive.status = status.to_string();
                }
                state.async_handles += 1;
                json!({ "asyncHandle": state.async_handles })
            }
            "GetAsyncResult" => json!({ "status": "complete", "result": {} }),

            "ListActiveNodes" => json!({ "nodes": state.nodes }),
            "ListServices" => {
                let mut services = Vec::new();
                for node in &state.nodes {
                    services.push(json!({ "service": { "serviceID": node.node_id * 100, "serviceType": "slice", "nodeID": node.node_id, "status": "healthy" } }));
                }
                for drive in state.drives.iter().filter(|d| d.status == "active") {
                    services.push(json!({
                        "service": { "serviceID": drive.drive_id, "serviceType": "block", "nodeID": drive.node_id, "driveID": drive.drive_id, "status": "healthy" },
                        "drive": { "driveID": drive.drive_id }
                    }));
                }
                services.push(json!({ "node": { "nodeID": 0 } }));
                json!({ "services": services })
            }
            "ListPendingNodes" => json!({ "pendingNodes": state.pending_nodes }),
            "ListAllNodes" => json!({ "nodes": state.nodes, "pendingNodes": state.pending_nodes }),
            "AddNodes" => {
                let ids = id_list(params, "pendingNodes");
                let (added, pending): (Vec<PendingNode>, Vec<PendingNode>) = std::mem::take(&mut state.pending_nodes)
                    .into_iter()
                    .partition(|p| ids.contains(&p.pending_node_id));
                state.pending_nodes = pending;
                for p in added {
                    let node_id = state.allocate_id();
                    state.nodes.push(Node {
                        node_id,
                        mip: p.mip,
                        ..Default::default()
                    });
                }
                json!({})
            }
            "RemoveNodes" => {
                let ids = id_list(params, "nodes");
                state.nodes.retain(|n| !ids.contains(&n.node_id));
                json!({})
            }
            "ListEvents" => {
                let events: Vec<&RawEvent> = state.events.iter().rev().collect();
                json!({ "events": events })
            }
            "StartGC" => {
                if state.next_gc_generation > 0 {
                    let generation = state.next_gc_generation;
                    let event_id = state.events.len() as u64 + 1;
                    state.events.push(RawEvent {
                        event_id,
                        message: "GCStarted".into(),
                        time_of_report: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                        details: json!({ "generation": generation, "participatingSS": [1], "eligibleBS": [10] }),
                        ..Default::default()
                    });
                    state.next_gc_generation += 1;
                }
                json!({})
            }

            other => return Err(api_error("xUnknownAPIMethod", format!("Unknown method {}", other))),
        };
        Ok(result)
    }
}

#[async_trait]
impl Transport for FakeCluster {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn call_at(&self, _endpoint: &Endpoint, method: &str, params: Value, _version: ApiVersion) -> Result<Value> {
        self.calls.write().push((method.to_string(), params.clone()));
        self.handle(method, &params)
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        Err(Error::transport(MVIP, format!("no report at {}", path)))
    }
}

// ============================================================================
// Running subcommands
// ============================================================================

/// Defaults with millisecond polling and ten API calls in flight.
pub fn test_config() -> Config {
    Config {
        poll: PollConfig::uniform(Duration::from_millis(10)),
        parallel: ParallelConfig {
            calls_max: 10,
            ..ParallelConfig::default()
        },
        ..Config::default()
    }
}

pub fn context(fake: &Arc<FakeCluster>) -> ActionContext {
    ActionContext::new(Arc::new(test_config()), OutputFormat::Human).with_cluster(fake.cluster())
}

/// Parse `args` as an sfctl command line and run it against `fake`.
///
/// Returns the exit code.
pub async fn run_command(fake: &Arc<FakeCluster>, args: &[&str]) -> i32 {
    let argv = std::iter::once("sfctl").chain(args.iter().copied());
    let cli = Cli::try_parse_from(argv).unwrap_or_else(|e| panic!("could not parse {:?}: {}", args, e));
    cli.command.run(&ActionRunner::new(), &context(fake)).await
}
