//! Address allocators
//!
//! Pure state machines over address and port resources. Neither owns a
//! clock or a socket: drivers pass pre-parsed request fields and the current
//! time, and call `expire`/`release` on their own schedule.

mod lease_pool;
mod napt;
mod range;

pub use lease_pool::{Lease, LeasePool};
pub use napt::{InternalEndpoint, Mapping, NatTable, Protocol};
pub use range::{allocatable_hosts, parse_network, PortRange, Timestamp};
