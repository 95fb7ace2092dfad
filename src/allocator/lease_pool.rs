//! DHCP-style IPv4 lease pool
//!
//! Binds client identifiers to addresses of a network block for a fixed
//! lease term. Time is supplied by the caller on every call; expired leases
//! are swept before each allocation decision.

use super::range::{allocatable_hosts, parse_network, Timestamp};
use crate::config::LeasePoolConfig;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use tracing::{debug, trace, warn};

/// A single lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub client_id: String,
    pub address: Ipv4Addr,
    /// The lease is live while `now < expiry`, or forever at `Timestamp::MAX`
    pub expiry: Timestamp,
}

impl Lease {
    /// A saturated expiry (`Timestamp::MAX`) never lapses
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.expiry > now || self.expiry == Timestamp::MAX
    }
}

/// Lease pool over one network block
#[derive(Debug)]
pub struct LeasePool {
    network: Ipv4Net,
    lease_time: u64,
    /// Allocatable addresses at construction
    capacity: usize,
    /// Free addresses, handed out from the front and returned to the back
    available: VecDeque<Ipv4Addr>,
    /// Client -> lease
    leases: HashMap<String, Lease>,
    /// Address -> client reverse mapping
    holders: HashMap<Ipv4Addr, String>,
}

impl LeasePool {
    /// Create a new lease pool
    pub fn new(config: LeasePoolConfig) -> Self {
        let network = config.network.trunc();
        let exclusions: HashSet<Ipv4Addr> = config.exclusions.into_iter().collect();
        let available: VecDeque<Ipv4Addr> =
            allocatable_hosts(network, config.reserved_hosts, &exclusions).collect();

        debug!(
            "lease pool created for {} with {} addresses ({} reserved, {} excluded)",
            network,
            available.len(),
            config.reserved_hosts,
            exclusions.len()
        );

        Self {
            network,
            lease_time: config.lease_time,
            capacity: available.len(),
            available,
            leases: HashMap::new(),
            holders: HashMap::new(),
        }
    }

    /// Create a pool from a CIDR string with default reservation and no exclusions
    pub fn with_network(cidr: &str, lease_time: u64) -> Result<Self> {
        let mut config = LeasePoolConfig::new(parse_network(cidr)?);
        config.lease_time = lease_time;
        Ok(Self::new(config))
    }

    /// Get or allocate an address for `client_id`.
    ///
    /// A client holding a live lease gets the same address back and its
    /// expiry is left untouched.
    pub fn request(&mut self, client_id: &str, now: Timestamp) -> Result<Ipv4Addr> {
        self.expire(now);

        if let Some(lease) = self.leases.get(client_id).filter(|l| l.is_live(now)) {
            return Ok(lease.address);
        }

        let Some(address) = self.available.pop_front() else {
            warn!("lease pool {} exhausted, cannot serve {}", self.network, client_id);
            return Err(Error::ResourceExhausted {
                network: self.network.to_string(),
            });
        };

        let expiry = now.saturating_add(self.lease_time);
        self.commit(Lease {
            client_id: client_id.to_string(),
            address,
            expiry,
        });
        debug!("leased {} to {} until {}", address, client_id, expiry);
        Ok(address)
    }

    /// Extend the lease of `client_id`, allocating one if it has none.
    ///
    /// Expiry never moves backwards.
    pub fn renew(&mut self, client_id: &str, now: Timestamp) -> Result<Ipv4Addr> {
        self.expire(now);

        let expiry = now.saturating_add(self.lease_time);
        if let Some(lease) = self.leases.get_mut(client_id).filter(|l| l.is_live(now)) {
            lease.expiry = lease.expiry.max(expiry);
            debug!("renewed {} for {} until {}", lease.address, client_id, lease.expiry);
            return Ok(lease.address);
        }

        self.request(client_id, now)
    }

    /// Drop the lease of `client_id` regardless of its expiry.
    ///
    /// Returns the freed address, now at the back of the queue.
    pub fn release(&mut self, client_id: &str) -> Option<Ipv4Addr> {
        let address = self.evict(client_id)?;
        debug!("lease of {} released by {}", address, client_id);
        Some(address)
    }

    /// Reclaim every lease that is no longer live at `now`. Returns the count.
    ///
    /// Freed addresses are queued by expiry, then address.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let mut expired: Vec<(Timestamp, Ipv4Addr, String)> = self
            .leases
            .values()
            .filter(|l| !l.is_live(now))
            .map(|l| (l.expiry, l.address, l.client_id.clone()))
            .collect();
        expired.sort_unstable();

        for (_, address, client_id) in &expired {
            trace!("lease of {} for {} expired", address, client_id);
            self.evict(client_id);
        }
        expired.len()
    }

    /// Number of addresses ready to be handed out
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Number of tracked leases.
    ///
    /// Without `now` this includes expired leases not yet swept; with `now`
    /// only leases still live at that time are counted.
    pub fn active_count(&self, now: Option<Timestamp>) -> usize {
        match now {
            None => self.leases.len(),
            Some(now) => self.leases.values().filter(|l| l.is_live(now)).count(),
        }
    }

    pub fn lease(&self, client_id: &str) -> Option<&Lease> {
        self.leases.get(client_id)
    }

    /// Client currently holding `address`
    pub fn holder(&self, address: Ipv4Addr) -> Option<&str> {
        self.holders.get(&address).map(String::as_str)
    }

    pub fn is_available(&self, address: Ipv4Addr) -> bool {
        self.available.contains(&address)
    }

    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    pub fn lease_time(&self) -> u64 {
        self.lease_time
    }

    /// Number of allocatable addresses (available + leased)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record `lease` under both indices.
    ///
    /// A stale holder of the address loses its lease, and an older address
    /// held by the same client goes back to the queue.
    fn commit(&mut self, lease: Lease) {
        if let Some(stale) = self.holders.remove(&lease.address) {
            if stale != lease.client_id {
                warn!("dropping stale lease of {} held by {}", lease.address, stale);
                self.leases.remove(&stale);
            }
        }

        if let Some(previous) = self.leases.remove(&lease.client_id) {
            if previous.address != lease.address {
                self.holders.remove(&previous.address);
                self.available.push_back(previous.address);
            }
        }

        self.holders.insert(lease.address, lease.client_id.clone());
        self.leases.insert(lease.client_id.clone(), lease);
    }

    /// Remove the lease of `client_id` from both indices and requeue its address
    fn evict(&mut self, client_id: &str) -> Option<Ipv4Addr> {
        let lease = self.leases.remove(client_id)?;
        self.holders.remove(&lease.address);
        self.available.push_back(lease.address);
        Some(lease.address)
    }
}
