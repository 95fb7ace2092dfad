//! Configuration types

use crate::allocator::{parse_network, PortRange};
use crate::telemetry::LogConfig;
use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer};
use std::net::Ipv4Addr;

/// Default lease term, in time units
pub const DEFAULT_LEASE_TIME: u64 = 3600;
/// Default NAT idle timeout, in time units
pub const DEFAULT_IDLE_TIMEOUT: u64 = 60;
/// Hosts held back at the start of the block (the gateway)
pub const DEFAULT_RESERVED_HOSTS: usize = 1;

/// Top-level configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dhcp: Option<LeasePoolConfig>,
    #[serde(default)]
    pub nat: Option<NatConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

/// Lease pool settings (`[dhcp]`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeasePoolConfig {
    /// Network block the pool is carved from; host bits are ignored and a
    /// bare address is a /32
    #[serde(deserialize_with = "deserialize_network")]
    pub network: Ipv4Net,
    #[serde(default = "default_lease_time")]
    pub lease_time: u64,
    /// Addresses never handed out
    #[serde(default)]
    pub exclusions: Vec<Ipv4Addr>,
    /// Number of leading host addresses to reserve, 0 disables
    #[serde(default = "default_reserved_hosts")]
    pub reserved_hosts: usize,
}

impl LeasePoolConfig {
    pub fn new(network: Ipv4Net) -> Self {
        Self {
            network,
            lease_time: DEFAULT_LEASE_TIME,
            exclusions: Vec::new(),
            reserved_hosts: DEFAULT_RESERVED_HOSTS,
        }
    }
}

/// NAPT settings (`[nat]`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NatConfig {
    pub public_ip: Ipv4Addr,
    #[serde(default)]
    pub port_range: PortRange,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl NatConfig {
    pub fn new(public_ip: Ipv4Addr) -> Self {
        Self {
            public_ip,
            port_range: PortRange::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

fn deserialize_network<'de, D>(deserializer: D) -> Result<Ipv4Net, D::Error>
where
    D: Deserializer<'de>,
{
    let cidr = String::deserialize(deserializer)?;
    parse_network(&cidr).map_err(serde::de::Error::custom)
}

fn default_lease_time() -> u64 {
    DEFAULT_LEASE_TIME
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT
}

fn default_reserved_hosts() -> usize {
    DEFAULT_RESERVED_HOSTS
}
