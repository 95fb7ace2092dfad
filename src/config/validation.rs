//! Configuration validation

use super::{Config, LeasePoolConfig, NatConfig};
use crate::allocator::allocatable_hosts;
use std::collections::HashSet;
use tracing::{error, warn};

/// Ports below this are well-known/privileged
const PRIVILEGED_PORT_LIMIT: u16 = 1024;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Emit every finding through the tracing subscriber
    pub fn log_diagnostics(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        for err in &self.errors {
            error!("{}", err);
        }
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Some(dhcp) = &config.dhcp {
        validate_dhcp(dhcp, &mut result);
    }
    if let Some(nat) = &config.nat {
        validate_nat(nat, &mut result);
    }
    if let (Some(dhcp), Some(nat)) = (&config.dhcp, &config.nat) {
        if dhcp.network.contains(&nat.public_ip) {
            result.warn(format!(
                "nat.public_ip: {} lies inside the leased network {}",
                nat.public_ip, dhcp.network
            ));
        }
    }

    result
}

fn validate_dhcp(dhcp: &LeasePoolConfig, result: &mut ValidationResult) {
    if dhcp.lease_time == 0 {
        result.error("dhcp.lease_time: must be greater than zero");
    }

    for ip in &dhcp.exclusions {
        if !dhcp.network.contains(ip) {
            result.warn(format!(
                "dhcp.exclusions: {} is outside {} and has no effect",
                ip, dhcp.network
            ));
        }
    }

    let exclusions: HashSet<_> = dhcp.exclusions.iter().copied().collect();
    let mut hosts = allocatable_hosts(dhcp.network, dhcp.reserved_hosts, &exclusions);
    if hosts.next().is_none() {
        result.warn(format!(
            "dhcp: no allocatable addresses left in {} after {} reserved and {} excluded",
            dhcp.network,
            dhcp.reserved_hosts,
            dhcp.exclusions.len()
        ));
    }
}

fn validate_nat(nat: &NatConfig, result: &mut ValidationResult) {
    if nat.idle_timeout == 0 {
        result.error("nat.idle_timeout: must be greater than zero");
    }

    if nat.public_ip.is_unspecified() || nat.public_ip.is_broadcast() {
        result.error(format!(
            "nat.public_ip: {} is not a usable address",
            nat.public_ip
        ));
    }

    if nat.port_range.min() < PRIVILEGED_PORT_LIMIT {
        result.warn(format!(
            "nat.port_range: {} includes privileged ports below {}",
            nat.port_range, PRIVILEGED_PORT_LIMIT
        ));
    }
}
