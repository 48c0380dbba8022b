//! VLAN subcommands.

use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use validator::Validate;

use crate::action::{Action, ActionContext, EventHooks};
use crate::cluster::{Outcome, VlanSpec};
use crate::error::{Error, Result};
use crate::logging;

fn parse_address(value: &str, what: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::argument(format!("invalid value for {} - '{}' is not an address", what, value)))
}

/// Create a tagged virtual network
#[derive(Args, Debug, Clone, Validate)]
pub struct CreateVlanArgs {
    /// VLAN tag
    #[arg(long)]
    #[validate(custom(function = "crate::validate::vlan_tag"))]
    pub tag: u32,

    /// First address for nodes on the VLAN
    #[arg(long)]
    #[validate(custom(function = "crate::validate::ipv4"))]
    pub address_start: String,

    /// Number of addresses for nodes on the VLAN
    #[arg(long)]
    #[validate(range(min = 1, max = 4096))]
    pub address_count: u32,

    /// Netmask for nodes on the VLAN
    #[arg(long)]
    pub netmask: String,

    /// Storage virtual IP on the VLAN
    #[arg(long)]
    #[validate(custom(function = "crate::validate::ipv4"))]
    pub svip: String,

    /// Put the VLAN in its own namespace
    #[arg(long)]
    pub namespace: bool,

    /// Fail if the VLAN already exists
    #[arg(long)]
    pub strict: bool,
}

impl CreateVlanArgs {
    pub fn spec(&self) -> Result<VlanSpec> {
        let netmask = parse_address(&self.netmask, "netmask")?;
        if u32::from(netmask).leading_ones() + u32::from(netmask).trailing_zeros() != 32 {
            return Err(Error::argument(format!("invalid value for netmask - '{}' is not a netmask", self.netmask)));
        }
        Ok(VlanSpec {
            tag: self.tag,
            address_start: parse_address(&self.address_start, "address_start")?,
            address_count: self.address_count,
            netmask,
            svip: parse_address(&self.svip, "svip")?,
            namespace: self.namespace,
        })
    }
}

#[async_trait]
impl Action for CreateVlanArgs {
    const NAME: &'static str = "create-vlan";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_CREATE_VLAN", "AFTER_CREATE_VLAN"]
    }

    fn check(&self) -> Result<()> {
        self.spec().map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let spec = self.spec()?;
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_CREATE_VLAN")?;
        let vlan = match cluster.create_vlan(&spec, self.strict).await? {
            Outcome::Changed(vlan) => {
                logging::pass(format!("Successfully created VLAN {}", spec.tag));
                vlan
            }
            Outcome::Unchanged(vlan) => {
                logging::pass(format!("VLAN {} already exists", spec.tag));
                vlan
            }
        };
        hooks.raise("AFTER_CREATE_VLAN")?;
        Ok(json!({ "virtualNetworkID": vlan.virtual_network_id }))
    }
}

/// Delete a tagged virtual network
#[derive(Args, Debug, Clone, Validate)]
pub struct DeleteVlanArgs {
    /// VLAN tag
    #[arg(long)]
    #[validate(custom(function = "crate::validate::vlan_tag"))]
    pub tag: u32,

    /// Fail if the VLAN does not exist
    #[arg(long)]
    pub strict: bool,
}

#[async_trait]
impl Action for DeleteVlanArgs {
    const NAME: &'static str = "delete-vlan";

    fn events(&self) -> &'static [&'static str] {
        &["BEFORE_DELETE_VLAN", "AFTER_DELETE_VLAN"]
    }

    async fn execute(&self, ctx: &ActionContext, hooks: &EventHooks) -> Result<Value> {
        let cluster = ctx.cluster()?;
        hooks.raise("BEFORE_DELETE_VLAN")?;
        match cluster.delete_vlan(self.tag, self.strict).await? {
            Outcome::Changed(_) => logging::pass(format!("Successfully deleted VLAN {}", self.tag)),
            Outcome::Unchanged(_) => logging::pass(format!("VLAN {} does not exist", self.tag)),
        }
        hooks.raise("AFTER_DELETE_VLAN")?;
        Ok(json!(true))
    }
}
