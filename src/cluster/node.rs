//! Storage nodes, active and pending, and shell access to them.

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::Cluster;
use crate::api::types::{NetworkInterface, Node, PendingNode};
use crate::connection::{CommandResult, ExecuteOptions, RemoteShell, SshCredentials, SshSession};
use crate::error::{Error, Result};

/// One active node, with an SSH session opened on first use.
pub struct ClusterNode {
    node: Node,
    cluster: Cluster,
    credentials: SshCredentials,
    session: OnceCell<SshSession>,
}

impl ClusterNode {
    pub fn new(node: Node, cluster: Cluster) -> Self {
        let credentials = SshCredentials::from(&cluster.config().ssh);
        Self {
            node,
            cluster,
            credentials,
            session: OnceCell::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: SshCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn mip(&self) -> &str {
        &self.node.mip
    }

    async fn session(&self) -> Result<&SshSession> {
        self.session
            .get_or_try_init(|| async {
                debug!("Opening SSH session to {}", self.node.mip);
                SshSession::connect(&self.node.mip, &self.credentials)
                    .await
                    .map_err(|e| e.into_error(&self.node.mip, "connect"))
            })
            .await
    }

    /// Run a shell command on the node. A non-zero exit is not an error here.
    pub async fn exec(&self, command: &str) -> Result<CommandResult> {
        let options = ExecuteOptions::new().with_timeout(self.cluster.config().ssh.command_timeout);
        self.exec_with(command, &options).await
    }

    pub async fn exec_with(&self, command: &str, options: &ExecuteOptions) -> Result<CommandResult> {
        let session = self.session().await?;
        debug!("{}: {}", self.node.mip, command);
        session
            .execute(command, options)
            .await
            .map_err(|e| e.into_error(&self.node.mip, "execute"))
    }

    pub async fn expected_drive_count(&self) -> Result<u32> {
        Ok(self.cluster.api().get_drive_config(&self.node.mip).await?.num_total_expected)
    }

    pub async fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        self.cluster.api().list_network_interfaces(&self.node.mip).await
    }

    pub async fn hostname(&self) -> Result<String> {
        self.cluster.api().get_node_hostname(&self.node.mip).await
    }

    /// Close the SSH session if one was opened.
    pub async fn close(&self) -> Result<()> {
        if let Some(session) = self.session.get() {
            session
                .close()
                .await
                .map_err(|e| e.into_error(&self.node.mip, "close"))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("node_id", &self.node.node_id)
            .field("mip", &self.node.mip)
            .field("connected", &self.session.initialized())
            .finish()
    }
}

/// Match pending nodes to the requested management IPs, in request order.
pub fn select_pending<'a>(pending: &'a [PendingNode], ips: &[String]) -> Result<Vec<&'a PendingNode>> {
    let found: Vec<&PendingNode> = ips
        .iter()
        .filter_map(|ip| pending.iter().find(|p| &p.mip == ip))
        .collect();
    if found.len() != ips.len() {
        return Err(Error::unknown("Could not find all requested pending nodes"));
    }
    Ok(found)
}

impl Cluster {
    pub async fn list_active_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes = self.api().list_active_nodes().await?;
        nodes.sort_by_key(|n| n.node_id);
        Ok(nodes)
    }

    pub async fn list_pending_nodes(&self) -> Result<Vec<PendingNode>> {
        let mut nodes = self.api().list_pending_nodes().await?;
        nodes.sort_by_key(|n| n.pending_node_id);
        Ok(nodes)
    }

    /// Active node by management IP.
    pub async fn find_node(&self, mip: &str) -> Result<Node> {
        self.list_active_nodes()
            .await?
            .into_iter()
            .find(|n| n.mip == mip)
            .ok_or_else(|| Error::unknown(format!("Could not find node {}", mip)))
    }

    pub async fn find_node_by_id(&self, node_id: u64) -> Result<Node> {
        self.list_active_nodes()
            .await?
            .into_iter()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| Error::unknown(format!("Could not find node {}", node_id)))
    }

    /// Shell-capable handle for the node at `mip`.
    pub async fn node(&self, mip: &str) -> Result<ClusterNode> {
        Ok(ClusterNode::new(self.find_node(mip).await?, self.clone()))
    }

    /// Node IDs for a list of management IPs.
    pub async fn node_ids(&self, ips: &[String]) -> Result<Vec<u64>> {
        let all = self.api().list_all_nodes().await?;
        ips.iter()
            .map(|ip| {
                all.nodes
                    .iter()
                    .find(|n| &n.mip == ip)
                    .map(|n| n.node_id)
                    .ok_or_else(|| Error::unknown(format!("Could not find node {}", ip)))
            })
            .collect()
    }

    /// Add pending nodes by management IP. Returns the pending node IDs.
    pub async fn add_nodes(&self, ips: &[String], auto_install: bool) -> Result<Vec<u64>> {
        let pending = self.list_pending_nodes().await?;
        let ids: Vec<u64> = select_pending(&pending, ips)?
            .into_iter()
            .map(|p| p.pending_node_id)
            .collect();
        info!("Adding {} nodes to cluster", ids.len());
        self.api().add_nodes(&ids, auto_install).await?;
        Ok(ids)
    }

    /// Remove active nodes by management IP.
    pub async fn remove_nodes(&self, ips: &[String]) -> Result<Vec<u64>> {
        let ids = self.node_ids(ips).await?;
        info!("Removing {} nodes from cluster", ids.len());
        self.api().remove_nodes(&ids).await?;
        Ok(ids)
    }
}
