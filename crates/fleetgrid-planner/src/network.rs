//! Manual networks and IP bookkeeping.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use fleet_core::net::parse_ip_ranges;
use fleet_core::{Ipv4Cidr, NetError, NetworkSpec, SubnetSpec};

/// A subnet with its reserved and static address ranges resolved.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub cidr: Ipv4Cidr,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
    reserved: Vec<RangeInclusive<u32>>,
    static_ranges: Vec<RangeInclusive<u32>>,
}

impl Subnet {
    pub fn from_spec(spec: &SubnetSpec) -> Result<Self, NetError> {
        let cidr: Ipv4Cidr = spec.range.parse()?;
        let reserved = parse_ip_ranges(&spec.reserved)?;
        let static_ranges = parse_ip_ranges(&spec.static_ips)?;
        for range in reserved.iter().chain(&static_ranges) {
            for bound in [*range.start(), *range.end()] {
                if !cidr.contains(Ipv4Addr::from(bound)) {
                    return Err(NetError::InvalidRange(format!(
                        "{} is outside subnet {}",
                        Ipv4Addr::from(bound),
                        spec.range
                    )));
                }
            }
        }
        Ok(Self {
            cidr,
            gateway: spec.gateway,
            dns: spec.dns.clone(),
            reserved,
            static_ranges,
        })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.cidr.contains(ip)
    }

    pub fn is_static(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        self.static_ranges.iter().any(|r| r.contains(&ip))
    }

    fn is_reserved(&self, ip: u32) -> bool {
        self.reserved.iter().any(|r| r.contains(&ip))
            || self.gateway.is_some_and(|g| u32::from(g) == ip)
    }

    /// Whether `ip` may be handed out dynamically.
    pub fn is_dynamic(&self, ip: Ipv4Addr) -> bool {
        let raw = u32::from(ip);
        self.cidr.hosts().contains(&raw) && !self.is_reserved(raw) && !self.is_static(ip)
    }

    /// Lowest dynamic address not in `taken`.
    pub fn first_free_dynamic(&self, taken: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
        self.cidr
            .hosts()
            .filter(|&raw| !self.is_reserved(raw))
            .map(Ipv4Addr::from)
            .find(|ip| !self.is_static(*ip) && !taken.contains(ip))
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    pub name: String,
    pub subnets: Vec<Subnet>,
}

impl Network {
    pub fn from_spec(spec: &NetworkSpec) -> Result<Self, NetError> {
        let subnets = spec
            .subnets
            .iter()
            .map(Subnet::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: spec.name.clone(),
            subnets,
        })
    }

    pub fn subnet_for(&self, ip: Ipv4Addr) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.contains(ip))
    }

    /// Whether `ip` lies in a static range of one of the subnets.
    pub fn is_static(&self, ip: Ipv4Addr) -> bool {
        self.subnet_for(ip).is_some_and(|s| s.is_static(ip))
    }

    pub fn is_dynamic(&self, ip: Ipv4Addr) -> bool {
        self.subnet_for(ip).is_some_and(|s| s.is_dynamic(ip))
    }

    /// Lowest free dynamic address of the first subnet with room.
    pub fn allocate_dynamic(&self, taken: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
        self.subnets.iter().find_map(|s| s.first_free_dynamic(taken))
    }
}
