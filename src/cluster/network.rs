//! Tagged virtual networks (VLANs).

use std::net::Ipv4Addr;
use tracing::info;

use super::{Cluster, Outcome};
use crate::api::client::NewVirtualNetwork;
use crate::api::types::{AddressBlock, VirtualNetwork};
use crate::error::{Error, Result};

/// A VLAN to create.
#[derive(Debug, Clone, PartialEq)]
pub struct VlanSpec {
    pub tag: u32,
    /// First address of the block handed to nodes
    pub address_start: Ipv4Addr,
    pub address_count: u32,
    pub netmask: Ipv4Addr,
    pub svip: Ipv4Addr,
    pub namespace: bool,
}

impl VlanSpec {
    pub fn name(&self) -> String {
        format!("vlan-{}", self.tag)
    }

    fn to_request(&self) -> NewVirtualNetwork {
        NewVirtualNetwork {
            virtual_network_tag: self.tag,
            name: self.name(),
            address_blocks: vec![AddressBlock {
                start: self.address_start,
                size: self.address_count,
            }],
            netmask: self.netmask.to_string(),
            svip: self.svip.to_string(),
            namespace: self.namespace,
        }
    }
}

impl Cluster {
    pub async fn list_vlans(&self) -> Result<Vec<VirtualNetwork>> {
        let mut vlans = self.api().list_virtual_networks().await?;
        vlans.sort_by_key(|v| v.virtual_network_tag);
        Ok(vlans)
    }

    pub async fn find_vlan(&self, tag: u32) -> Result<Option<VirtualNetwork>> {
        Ok(self
            .list_vlans()
            .await?
            .into_iter()
            .find(|v| v.virtual_network_tag == tag))
    }

    /// Create a VLAN; an existing tag is success unless `strict`.
    pub async fn create_vlan(&self, spec: &VlanSpec, strict: bool) -> Result<Outcome<VirtualNetwork>> {
        if let Some(existing) = self.find_vlan(spec.tag).await? {
            if strict {
                return Err(Error::other(format!("VLAN {} already exists", spec.tag)));
            }
            return Ok(Outcome::Unchanged(existing));
        }

        info!("Creating VLAN {}", spec.tag);
        self.api().add_virtual_network(&spec.to_request()).await?;
        let created = self
            .find_vlan(spec.tag)
            .await?
            .ok_or_else(|| Error::unknown(format!("VLAN {} is missing after creation", spec.tag)))?;
        Ok(Outcome::Changed(created))
    }

    /// Delete a VLAN; a missing tag is success unless `strict`.
    pub async fn delete_vlan(&self, tag: u32, strict: bool) -> Result<Outcome<Option<VirtualNetwork>>> {
        let Some(vlan) = self.find_vlan(tag).await? else {
            if strict {
                return Err(Error::unknown(format!("VLAN {} does not exist", tag)));
            }
            return Ok(Outcome::Unchanged(None));
        };
        info!("Deleting VLAN {}", tag);
        self.api().remove_virtual_network(vlan.virtual_network_id).await?;
        Ok(Outcome::Changed(Some(vlan)))
    }
}
