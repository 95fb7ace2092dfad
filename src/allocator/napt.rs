//! NAPT (Network Address Port Translation) table - RFC 3022, 4787
//!
//! N:1 masquerading with Endpoint-Independent Mapping: an internal
//! `(protocol, address, port)` keeps one external port on the public address
//! whatever the destination. Mappings are evicted after an idle timeout; the
//! caller drives the sweep with [`NatTable::expire`].

use super::range::{PortRange, Timestamp};
use crate::config::NatConfig;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use tracing::{debug, trace, warn};

/// Transport protocol of a mapping
///
/// Protocols other than the three NAPT knows by name are kept by their
/// lowercase name (or decimal number, see [`Protocol::from_u8`]) and mapped
/// the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(String),
}

impl Protocol {
    /// Map an IPv4 protocol number
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Protocol::Icmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            n => Protocol::Other(n.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Other(name) => name,
        }
    }
}

impl From<&str> for Protocol {
    /// Case-insensitive: `TCP`, `Tcp` and `tcp` are the same protocol
    fn from(s: &str) -> Self {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            _ => Protocol::Other(name),
        }
    }
}

impl FromStr for Protocol {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Protocol::from(s))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal endpoint identifier (source side before NAT)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalEndpoint {
    pub protocol: Protocol,
    pub address: Ipv4Addr,
    /// For ICMP: the echo identifier
    pub port: u16,
}

impl InternalEndpoint {
    pub fn new(protocol: Protocol, address: Ipv4Addr, port: u16) -> Self {
        Self {
            protocol,
            address,
            port,
        }
    }
}

impl fmt::Display for InternalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.protocol, self.address, self.port)
    }
}

/// NAPT mapping entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub internal: InternalEndpoint,
    pub external_port: u16,
    /// Last outbound, inbound or touch time
    pub last_seen: Timestamp,
}

impl Mapping {
    /// Idle once `now - last_seen >= timeout`; a `last_seen` ahead of `now` is never idle
    pub fn is_idle(&self, now: Timestamp, timeout: u64) -> bool {
        now.checked_sub(self.last_seen)
            .is_some_and(|idle| idle >= timeout)
    }
}

/// NAPT translation table
#[derive(Debug)]
pub struct NatTable {
    /// Internal -> Entry mapping (outbound lookup)
    internal_map: HashMap<InternalEndpoint, Mapping>,
    /// External port -> Internal endpoint (inbound lookup), ordered for gap search
    external_map: BTreeMap<u16, InternalEndpoint>,
    /// Public address shared by every mapping
    public_ip: Ipv4Addr,
    port_range: PortRange,
    idle_timeout: u64,
}

impl NatTable {
    /// Create a new NAPT table
    pub fn new(config: NatConfig) -> Self {
        debug!(
            "NAPT table created for {} with ports {} (idle timeout {})",
            config.public_ip, config.port_range, config.idle_timeout
        );

        Self {
            internal_map: HashMap::new(),
            external_map: BTreeMap::new(),
            public_ip: config.public_ip,
            port_range: config.port_range,
            idle_timeout: config.idle_timeout,
        }
    }

    /// Create a table from raw range bounds, requiring `1 <= min < max <= 65535`
    pub fn with_range(
        public_ip: Ipv4Addr,
        min: u16,
        max: u16,
        idle_timeout: u64,
    ) -> Result<Self> {
        Ok(Self::new(NatConfig {
            public_ip,
            port_range: PortRange::new(min, max)?,
            idle_timeout,
        }))
    }

    /// Get or create the mapping for outbound traffic (SNAT)
    ///
    /// An existing mapping is refreshed and keeps its port; a new one gets the
    /// lowest free port of the range.
    pub fn translate_outbound(
        &mut self,
        protocol: Protocol,
        address: Ipv4Addr,
        port: u16,
        now: Timestamp,
    ) -> Result<SocketAddrV4> {
        let internal = InternalEndpoint::new(protocol, address, port);

        if let Some(mapping) = self.internal_map.get_mut(&internal) {
            mapping.last_seen = now;
            return Ok(SocketAddrV4::new(self.public_ip, mapping.external_port));
        }

        let Some(external_port) = self.allocate_port() else {
            warn!("NAPT port range {} exhausted, cannot map {}", self.port_range, internal);
            return Err(Error::PortExhausted {
                min: self.port_range.min(),
                max: self.port_range.max(),
            });
        };

        debug!("mapped {} to {}:{}", internal, self.public_ip, external_port);
        self.commit(Mapping {
            internal,
            external_port,
            last_seen: now,
        });
        Ok(SocketAddrV4::new(self.public_ip, external_port))
    }

    /// Lookup the internal endpoint for inbound traffic (DNAT)
    ///
    /// Inbound traffic counts as activity when `now` is given.
    pub fn translate_inbound(
        &mut self,
        external_port: u16,
        now: Option<Timestamp>,
    ) -> Option<InternalEndpoint> {
        let internal = self.external_map.get(&external_port)?.clone();

        if let Some(now) = now {
            if let Some(mapping) = self.internal_map.get_mut(&internal) {
                mapping.last_seen = now;
            }
        }
        Some(internal)
    }

    /// Refresh an existing mapping without creating one
    pub fn touch(
        &mut self,
        protocol: Protocol,
        address: Ipv4Addr,
        port: u16,
        now: Timestamp,
    ) -> bool {
        let internal = InternalEndpoint::new(protocol, address, port);
        match self.internal_map.get_mut(&internal) {
            Some(mapping) => {
                mapping.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Remove a mapping, e.g. on TCP FIN/RST. Returns whether one existed.
    pub fn release(&mut self, protocol: Protocol, address: Ipv4Addr, port: u16) -> bool {
        let internal = InternalEndpoint::new(protocol, address, port);
        match self.evict(&internal) {
            Some(mapping) => {
                debug!("released {} (port {})", internal, mapping.external_port);
                true
            }
            None => false,
        }
    }

    /// Remove every mapping idle for at least the timeout. Returns the count.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let timeout = self.idle_timeout;
        let idle: Vec<InternalEndpoint> = self
            .internal_map
            .values()
            .filter(|m| m.is_idle(now, timeout))
            .map(|m| m.internal.clone())
            .collect();

        for internal in &idle {
            if let Some(mapping) = self.evict(internal) {
                trace!("mapping {} -> {} expired", internal, mapping.external_port);
            }
        }
        idle.len()
    }

    pub fn mapping(&self, internal: &InternalEndpoint) -> Option<&Mapping> {
        self.internal_map.get(internal)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.internal_map.values()
    }

    /// Set public address (e.g., after the WAN is renumbered). Ports are kept.
    pub fn set_public_ip(&mut self, ip: Ipv4Addr) {
        self.public_ip = ip;
    }

    pub fn public_ip(&self) -> Ipv4Addr {
        self.public_ip
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range
    }

    pub fn idle_timeout(&self) -> u64 {
        self.idle_timeout
    }

    /// Ports of the range not owned by a mapping
    pub fn available_ports(&self) -> usize {
        self.port_range.size() - self.external_map.len()
    }

    /// Get number of active mappings
    pub fn len(&self) -> usize {
        self.internal_map.len()
    }

    /// Check if table is empty
    pub fn is_empty(&self) -> bool {
        self.internal_map.is_empty()
    }

    /// Lowest port of the range with no mapping.
    ///
    /// Walks the ordered external index until the first gap, which is the
    /// same port a linear scan from `min` would find.
    fn allocate_port(&self) -> Option<u16> {
        let (min, max) = (self.port_range.min(), self.port_range.max());
        let mut candidate = u32::from(min);

        for &port in self.external_map.range(min..=max).map(|(port, _)| port) {
            if u32::from(port) != candidate {
                break;
            }
            candidate += 1;
        }

        u16::try_from(candidate).ok().filter(|port| *port <= max)
    }

    /// Record `mapping` under both indices, dropping whatever either index
    /// previously held for its port or endpoint.
    fn commit(&mut self, mapping: Mapping) {
        let internal = mapping.internal.clone();
        let external_port = mapping.external_port;

        if let Some(stale) = self.external_map.insert(external_port, internal.clone()) {
            if stale != internal {
                warn!("dropping stale mapping of port {} held by {}", external_port, stale);
                self.internal_map.remove(&stale);
            }
        }

        if let Some(previous) = self.internal_map.insert(internal, mapping) {
            if previous.external_port != external_port {
                self.external_map.remove(&previous.external_port);
            }
        }
    }

    /// Remove a mapping from both indices
    fn evict(&mut self, internal: &InternalEndpoint) -> Option<Mapping> {
        let mapping = self.internal_map.remove(internal)?;
        self.external_map.remove(&mapping.external_port);
        Some(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

    fn make_table(min: u16, max: u16, timeout: u64) -> NatTable {
        NatTable::with_range(PUBLIC_IP, min, max, timeout).unwrap()
    }

    fn lan(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 0, last)
    }

    /// Both indices describe the same set of mappings
    fn assert_consistent(table: &NatTable) {
        assert_eq!(table.internal_map.len(), table.external_map.len());
        for (port, internal) in &table.external_map {
            assert!(table.port_range.contains(*port));
            assert_eq!(table.internal_map[internal].external_port, *port);
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("Udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!(" icmp ".parse::<Protocol>().unwrap(), Protocol::Icmp);
        assert_eq!(
            "SCTP".parse::<Protocol>().unwrap(),
            Protocol::Other("sctp".to_string())
        );
        assert_eq!(Protocol::from(" Gre"), Protocol::Other("gre".to_string()));
        assert_eq!(Protocol::from("GRE").to_string(), "gre");
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(Protocol::from_u8(1), Protocol::Icmp);
        assert_eq!(Protocol::from_u8(6), Protocol::Tcp);
        assert_eq!(Protocol::from_u8(17), Protocol::Udp);
        assert_eq!(Protocol::from_u8(132), Protocol::Other("132".to_string()));
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }

    #[test]
    fn test_napt_table_new() {
        let table = make_table(40000, 40005, 30);
        assert!(table.is_empty());
        assert_eq!(table.public_ip(), PUBLIC_IP);
        assert_eq!(table.idle_timeout(), 30);
        assert_eq!(table.available_ports(), 6);
    }

    #[test]
    fn test_napt_table_invalid_range() {
        assert!(matches!(
            NatTable::with_range(PUBLIC_IP, 40005, 40000, 30),
            Err(Error::InvalidPortRange { .. })
        ));
        assert!(NatTable::with_range(PUBLIC_IP, 0, 10, 30).is_err());
    }

    #[test]
    fn test_napt_table_create_mapping() {
        let mut table = make_table(40000, 40005, 30);
        let external = table
            .translate_outbound(Protocol::Tcp, lan(10), 12345, 0)
            .unwrap();

        assert_eq!(external, SocketAddrV4::new(PUBLIC_IP, 40000));
        assert_eq!(table.len(), 1);
        assert_eq!(table.available_ports(), 5);
        assert_consistent(&table);
    }

    #[test]
    fn test_napt_table_reuse_mapping() {
        let mut table = make_table(40000, 40005, 30);
        let first = table
            .translate_outbound(Protocol::Tcp, lan(10), 12345, 0)
            .unwrap();
        let second = table
            .translate_outbound(Protocol::Tcp, lan(10), 12345, 7)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        let internal = InternalEndpoint::new(Protocol::Tcp, lan(10), 12345);
        assert_eq!(table.mapping(&internal).unwrap().last_seen, 7);
    }

    #[test]
    fn test_napt_table_protocol_distinguishes() {
        let mut table = make_table(40000, 40005, 30);
        let tcp = table.translate_outbound(Protocol::Tcp, lan(10), 53, 0).unwrap();
        let udp = table.translate_outbound(Protocol::Udp, lan(10), 53, 0).unwrap();
        assert_ne!(tcp.port(), udp.port());
    }

    #[test]
    fn test_napt_table_maps_other_protocols() {
        let mut table = make_table(40000, 40005, 30);
        let sctp = table
            .translate_outbound("SCTP".into(), lan(10), 2905, 0)
            .unwrap();
        let tcp = table.translate_outbound(Protocol::Tcp, lan(10), 2905, 0).unwrap();
        assert_ne!(sctp.port(), tcp.port());

        let again = table
            .translate_outbound("sctp".into(), lan(10), 2905, 5)
            .unwrap();
        assert_eq!(again, sctp);
        assert_eq!(table.len(), 2);

        let found = table.translate_inbound(sctp.port(), None).unwrap();
        assert_eq!(found.protocol, Protocol::Other("sctp".to_string()));
        assert_eq!(found.address, lan(10));
        assert_eq!(found.port, 2905);
        assert_eq!(found.to_string(), "sctp/192.168.0.10:2905");

        assert!(table.release(Protocol::from("Sctp"), lan(10), 2905));
        assert_eq!(table.translate_inbound(sctp.port(), None), None);
        assert_consistent(&table);
    }

    #[test]
    fn test_napt_table_sequential_ports() {
        let mut table = make_table(40000, 40005, 30);
        let ports: Vec<u16> = (0..6)
            .map(|i| {
                table
                    .translate_outbound(Protocol::Udp, lan(10 + i), 1000, 0)
                    .unwrap()
                    .port()
            })
            .collect();
        assert_eq!(ports, (40000..=40005).collect::<Vec<u16>>());
    }

    #[test]
    fn test_napt_table_lowest_gap_reused() {
        let mut table = make_table(40000, 40005, 30);
        for i in 0..4 {
            table.translate_outbound(Protocol::Udp, lan(10 + i), 1000, 0).unwrap();
        }
        assert!(table.release(Protocol::Udp, lan(11), 1000)); // frees 40001
        assert!(table.release(Protocol::Udp, lan(10), 1000)); // frees 40000

        let next = table.translate_outbound(Protocol::Udp, lan(20), 1000, 1).unwrap();
        assert_eq!(next.port(), 40000);
        let next = table.translate_outbound(Protocol::Udp, lan(21), 1000, 1).unwrap();
        assert_eq!(next.port(), 40001);
        let next = table.translate_outbound(Protocol::Udp, lan(22), 1000, 1).unwrap();
        assert_eq!(next.port(), 40004);
        assert_consistent(&table);
    }

    #[test]
    fn test_napt_table_translate_inbound() {
        let mut table = make_table(40000, 40005, 30);
        let external = table
            .translate_outbound(Protocol::Tcp, lan(10), 12345, 0)
            .unwrap();

        let found = table.translate_inbound(external.port(), None).unwrap();
        assert_eq!(found, InternalEndpoint::new(Protocol::Tcp, lan(10), 12345));
        // Lookup without time leaves last_seen alone
        assert_eq!(table.mapping(&found).unwrap().last_seen, 0);

        table.translate_inbound(external.port(), Some(25)).unwrap();
        assert_eq!(table.mapping(&found).unwrap().last_seen, 25);
    }

    #[test]
    fn test_napt_table_inbound_no_mapping() {
        let mut table = make_table(40000, 40005, 30);
        assert!(table.translate_inbound(40000, Some(1)).is_none());
        assert!(table.translate_inbound(80, None).is_none());
    }

    #[test]
    fn test_napt_table_touch() {
        let mut table = make_table(40000, 40005, 30);
        assert!(!table.touch(Protocol::Tcp, lan(10), 12345, 5));
        assert!(table.is_empty());

        table.translate_outbound(Protocol::Tcp, lan(10), 12345, 0).unwrap();
        assert!(table.touch(Protocol::Tcp, lan(10), 12345, 20));
        assert_eq!(table.expire(49), 0);
        assert_eq!(table.expire(50), 1);
    }

    #[test]
    fn test_napt_table_release() {
        let mut table = make_table(40000, 40005, 30);
        let external = table
            .translate_outbound(Protocol::Tcp, lan(10), 12345, 0)
            .unwrap();

        assert!(table.release(Protocol::Tcp, lan(10), 12345));
        assert!(table.is_empty());
        assert!(table.translate_inbound(external.port(), None).is_none());
        assert!(!table.release(Protocol::Tcp, lan(10), 12345));
        assert_consistent(&table);
    }

    #[test]
    fn test_napt_table_expire_entries() {
        let mut table = make_table(40000, 40005, 30);
        table.translate_outbound(Protocol::Tcp, lan(10), 12345, 0).unwrap();
        table.translate_outbound(Protocol::Tcp, lan(11), 12346, 10).unwrap();

        assert_eq!(table.expire(29), 0);
        assert_eq!(table.expire(30), 1);
        assert_eq!(table.expire(30), 0);
        assert_eq!(table.len(), 1);
        assert!(table.translate_inbound(40000, None).is_none());
        assert_eq!(table.expire(40), 1);
        assert!(table.is_empty());
        assert_consistent(&table);
    }

    #[test]
    fn test_napt_table_no_implicit_expiry() {
        let mut table = make_table(40000, 40001, 10);
        table.translate_outbound(Protocol::Udp, lan(10), 1, 0).unwrap();
        table.translate_outbound(Protocol::Udp, lan(11), 1, 0).unwrap();

        // Both are long idle, but only expire() evicts
        assert!(matches!(
            table.translate_outbound(Protocol::Udp, lan(12), 1, 1000),
            Err(Error::PortExhausted { min: 40000, max: 40001 })
        ));
        assert_eq!(table.translate_inbound(40000, None).unwrap().address, lan(10));

        assert_eq!(table.expire(1000), 2);
        let port = table.translate_outbound(Protocol::Udp, lan(12), 1, 1000).unwrap();
        assert_eq!(port.port(), 40000);
    }

    #[test]
    fn test_napt_table_future_last_seen_not_idle() {
        let mut table = make_table(40000, 40005, 0);
        table.translate_outbound(Protocol::Tcp, lan(10), 1, 100).unwrap();
        assert_eq!(table.expire(50), 0);
        assert_eq!(table.expire(100), 1);
    }

    #[test]
    fn test_napt_table_exhaustion() {
        let mut table = make_table(50000, 50002, 60);
        let mut ports = HashSet::new();
        for i in 0..3 {
            let address = Ipv4Addr::new(10, 0, 0, 2 + i);
            let external = table
                .translate_outbound(Protocol::Udp, address, 1000 + u16::from(i), 0)
                .unwrap();
            ports.insert(external.port());
        }
        assert_eq!(ports.len(), 3);

        let err = table
            .translate_outbound(Protocol::Udp, Ipv4Addr::new(10, 0, 0, 5), 1003, 0)
            .unwrap_err();
        assert!(matches!(err, Error::PortExhausted { min: 50000, max: 50002 }));
        assert_eq!(table.len(), 3);
        assert_eq!(table.available_ports(), 0);
        assert_consistent(&table);
    }

    #[test]
    fn test_napt_table_range_top() {
        let mut table = make_table(65534, 65535, 60);
        let first = table.translate_outbound(Protocol::Tcp, lan(1), 1, 0).unwrap();
        let second = table.translate_outbound(Protocol::Tcp, lan(2), 1, 0).unwrap();
        assert_eq!((first.port(), second.port()), (65534, 65535));
        assert!(table.translate_outbound(Protocol::Tcp, lan(3), 1, 0).is_err());
    }

    #[test]
    fn test_napt_table_set_public_ip() {
        let mut table = make_table(40000, 40005, 30);
        table.translate_outbound(Protocol::Tcp, lan(10), 1, 0).unwrap();

        let renumbered = Ipv4Addr::new(198, 51, 100, 9);
        table.set_public_ip(renumbered);
        let external = table.translate_outbound(Protocol::Tcp, lan(10), 1, 1).unwrap();
        assert_eq!(external, SocketAddrV4::new(renumbered, 40000));
    }

    #[test]
    fn test_napt_table_commit_drops_stale_port_owner() {
        let mut table = make_table(40000, 40005, 30);
        table.translate_outbound(Protocol::Tcp, lan(10), 1, 0).unwrap();

        let intruder = InternalEndpoint::new(Protocol::Tcp, lan(11), 1);
        table.commit(Mapping {
            internal: intruder.clone(),
            external_port: 40000,
            last_seen: 0,
        });

        assert_eq!(table.len(), 1);
        assert_eq!(table.translate_inbound(40000, None), Some(intruder));
        assert_consistent(&table);
    }
}
