//! IPv4 subnet and range arithmetic for manual networks.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("invalid CIDR range: {0}")]
    InvalidCidr(String),
    #[error("invalid IP or IP range: {0}")]
    InvalidRange(String),
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !self.mask())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == self.network
    }

    /// Usable host addresses: everything except network and broadcast.
    pub fn hosts(&self) -> RangeInclusive<u32> {
        let broadcast = u32::from(self.broadcast());
        if self.prefix >= 31 {
            self.network..=broadcast
        } else {
            (self.network + 1)..=(broadcast - 1)
        }
    }
}

impl FromStr for Ipv4Cidr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        let mut cidr = Self { network: 0, prefix };
        cidr.network = u32::from(addr) & cidr.mask();
        Ok(cidr)
    }
}

/// Parse `reserved`/`static` entries (`"10.0.0.5"` or
/// `"10.0.0.5 - 10.0.0.9"`) into inclusive numeric ranges.
pub fn parse_ip_ranges(entries: &[String]) -> Result<Vec<RangeInclusive<u32>>, NetError> {
    entries
        .iter()
        .map(|entry| {
            let invalid = || NetError::InvalidRange(entry.clone());
            let parse = |s: &str| s.trim().parse::<Ipv4Addr>().map(u32::from).map_err(|_| invalid());
            match entry.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse(start)?, parse(end)?);
                    if start > end {
                        return Err(invalid());
                    }
                    Ok(start..=end)
                }
                None => {
                    let ip = parse(entry)?;
                    Ok(ip..=ip)
                }
            }
        })
        .collect()
}
