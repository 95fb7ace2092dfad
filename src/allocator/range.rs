//! Address and port ranges shared by the lease pool and the NAPT table.

use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

/// Caller-supplied time value (seconds or logical ticks).
///
/// Units only need to be consistent across the calls made to one instance.
/// Deadlines computed from a time value saturate at `Timestamp::MAX`, which
/// is treated as "never": a lease expiring at `Timestamp::MAX` stays live.
pub type Timestamp = u64;

/// Closed interval of external ports `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(u16, u16)", into = "(u16, u16)")]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    /// Create a range, requiring `1 <= min < max <= 65535`.
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min == 0 || min >= max {
            return Err(Error::InvalidPortRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Number of ports in the range
    pub fn size(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.min..=self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 30000,
            max: 60000,
        }
    }
}

impl TryFrom<(u16, u16)> for PortRange {
    type Error = Error;

    fn try_from((min, max): (u16, u16)) -> Result<Self> {
        Self::new(min, max)
    }
}

impl From<PortRange> for (u16, u16) {
    fn from(range: PortRange) -> Self {
        (range.min, range.max)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Parse a CIDR block, tolerating host bits (`10.0.0.5/24` is `10.0.0.0/24`).
///
/// A bare address is treated as a /32.
pub fn parse_network(cidr: &str) -> Result<Ipv4Net> {
    let cidr = cidr.trim();
    let network = if cidr.contains('/') {
        cidr.parse::<Ipv4Net>()
            .map_err(|e| Error::InvalidNetwork(format!("{}: {}", cidr, e)))?
    } else {
        cidr.parse::<Ipv4Addr>()
            .map(Ipv4Net::from)
            .map_err(|e| Error::InvalidNetwork(format!("{}: {}", cidr, e)))?
    };
    Ok(network.trunc())
}

/// Allocatable hosts of `network` in ascending order.
///
/// Below /31 the network and broadcast addresses are not hosts; /31 yields
/// both addresses and /32 the single one. The first `reserved` hosts are held
/// back (conventionally the gateway) and `exclusions` are dropped. An empty
/// host set skips the reservation.
///
/// Hosts are produced lazily, so checking for an empty pool does not walk
/// the whole block.
pub fn allocatable_hosts<'a>(
    network: Ipv4Net,
    reserved: usize,
    exclusions: &'a HashSet<Ipv4Addr>,
) -> impl Iterator<Item = Ipv4Addr> + 'a {
    network
        .trunc()
        .hosts()
        .skip(reserved)
        .filter(move |ip| !exclusions.contains(ip))
}
