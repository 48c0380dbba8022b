//! IPv4 arithmetic used by VLAN and node-discovery operations.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parse a dotted-quad address.
pub fn parse_ip(value: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| Error::argument(format!("'{}' does not appear to be a valid address", value.trim())))
}

pub fn ip_to_int(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

pub fn int_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value)
}

/// Network address of `ip` under `mask`.
pub fn network_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    int_to_ip(ip_to_int(ip) & ip_to_int(mask))
}

/// Broadcast address of `ip` under `mask`.
pub fn broadcast_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    int_to_ip(ip_to_int(ip) | !ip_to_int(mask))
}

/// Netmask spanning the first and last address of a block.
pub fn netmask_for_range(start: Ipv4Addr, end: Ipv4Addr) -> Ipv4Addr {
    int_to_ip(0xFFFF_FFFF ^ ip_to_int(start) ^ ip_to_int(end))
}

/// Whether `ip` is on the network described by `network` and `mask`.
pub fn ip_in_network(ip: Ipv4Addr, network: Ipv4Addr, mask: Ipv4Addr) -> bool {
    network_address(ip, mask) == network_address(network, mask)
}

/// Prefix length of a dotted-quad netmask.
pub fn netmask_to_cidr(mask: Ipv4Addr) -> u8 {
    let bits = ip_to_int(mask);
    if bits == 0 {
        0
    } else {
        (32 - bits.trailing_zeros()) as u8
    }
}

/// Dotted-quad netmask for a prefix length.
pub fn cidr_to_netmask(prefix: u8) -> Ipv4Addr {
    match prefix {
        0 => Ipv4Addr::new(0, 0, 0, 0),
        p if p >= 32 => Ipv4Addr::new(255, 255, 255, 255),
        p => int_to_ip(u32::MAX << (32 - u32::from(p))),
    }
}

/// Parse a comma separated list of addresses.
pub fn parse_ip_list(value: &str) -> Result<Vec<Ipv4Addr>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_ip)
        .collect()
}

/// An inclusive range of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        let (s, e) = (ip_to_int(self.start), ip_to_int(self.end));
        if e < s {
            0
        } else {
            (e - s) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let value = ip_to_int(ip);
        value >= ip_to_int(self.start) && value <= ip_to_int(self.end)
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        (ip_to_int(self.start)..=ip_to_int(self.end)).map(int_to_ip)
    }
}

/// A subnet written as `1.1.1.0/24` or `1.1.1.0/255.255.255.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpSubnet {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl IpSubnet {
    pub fn prefix_len(&self) -> u8 {
        netmask_to_cidr(self.netmask)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        broadcast_address(self.network, self.netmask)
    }

    /// Usable host addresses: everything between the network and broadcast addresses.
    pub fn all_hosts(&self) -> IpRange {
        let network = ip_to_int(network_address(self.network, self.netmask));
        let broadcast = ip_to_int(self.broadcast());
        IpRange::new(
            int_to_ip(network.saturating_add(1)),
            int_to_ip(broadcast.saturating_sub(1)),
        )
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        ip_in_network(ip, self.network, self.netmask)
    }
}

impl FromStr for IpSubnet {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (network, mask) = value
            .split_once('/')
            .ok_or_else(|| Error::argument(format!("'{}' is not a subnet (expected a.b.c.d/nn)", value)))?;
        let network = parse_ip(network)?;
        let netmask = match mask.parse::<u8>() {
            Ok(prefix) if prefix <= 32 => cidr_to_netmask(prefix),
            Ok(prefix) => {
                return Err(Error::argument(format!("'{}' is not a valid prefix length", prefix)))
            }
            Err(_) => parse_ip(mask)?,
        };
        Ok(Self { network, netmask })
    }
}

impl fmt::Display for IpSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_network_math() {
        let mask = ip("255.255.255.0");
        assert_eq!(network_address(ip("10.1.2.77"), mask), ip("10.1.2.0"));
        assert_eq!(broadcast_address(ip("10.1.2.77"), mask), ip("10.1.2.255"));
        assert_eq!(netmask_for_range(ip("10.1.2.0"), ip("10.1.2.255")), mask);
        assert!(ip_in_network(ip("10.1.2.200"), ip("10.1.2.0"), mask));
        assert!(!ip_in_network(ip("10.1.3.1"), ip("10.1.2.0"), mask));
    }

    #[test]
    fn test_cidr_conversion() {
        assert_eq!(netmask_to_cidr(ip("255.255.255.0")), 24);
        assert_eq!(netmask_to_cidr(ip("255.255.240.0")), 20);
        assert_eq!(netmask_to_cidr(ip("0.0.0.0")), 0);
        assert_eq!(cidr_to_netmask(24), ip("255.255.255.0"));
        assert_eq!(cidr_to_netmask(32), ip("255.255.255.255"));
    }

    #[test]
    fn test_subnet_parse_forms() {
        let a: IpSubnet = "192.168.1.0/24".parse().unwrap();
        let b: IpSubnet = "192.168.1.0/255.255.255.0".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "192.168.1.0/24");
        assert!("192.168.1.0".parse::<IpSubnet>().is_err());
        assert!("192.168.1.0/40".parse::<IpSubnet>().is_err());
    }

    #[test]
    fn test_all_hosts() {
        let subnet: IpSubnet = "192.168.1.0/29".parse().unwrap();
        let hosts: Vec<_> = subnet.all_hosts().iter().collect();
        assert_eq!(hosts.len(), 6);
        assert_eq!(hosts[0], ip("192.168.1.1"));
        assert_eq!(hosts[5], ip("192.168.1.6"));
    }

    #[test]
    fn test_parse_ip_list() {
        let list = parse_ip_list("1.1.1.1, 2.2.2.2").unwrap();
        assert_eq!(list.len(), 2);
        assert!(parse_ip_list("1.1.1.1,nope").is_err());
    }
}
