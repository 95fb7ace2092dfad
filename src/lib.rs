//! leasenat - address management cores
//!
//! Two independent, synchronous state machines used by network
//! infrastructure:
//!
//! - [`LeasePool`]: DHCP-style IPv4 lease allocator over a CIDR block
//! - [`NatTable`]: NAPT mapping table over an external port range
//!
//! Neither performs I/O or reads a clock. Every time-sensitive call takes the
//! current time as a [`Timestamp`], so behavior is fully deterministic.

pub mod allocator;
pub mod config;
pub mod error;
pub mod telemetry;

pub use allocator::{
    InternalEndpoint, Lease, LeasePool, Mapping, NatTable, PortRange, Protocol, Timestamp,
};
pub use config::{Config, LeasePoolConfig, NatConfig};
pub use error::{Error, Result};
