//! Subnet Lease Coordination
//!
//! Partitions an overlay network into equally sized per-host subnets and
//! coordinates time-bounded leases on them through a shared store:
//! - Network config validation and subnet range derivation (IPv4 and IPv6)
//! - Canonical subnet store keys
//! - Lease acquisition, renewal, release and long-poll watching
//! - Agent loops for renewal and peer tracking
//!
//! Features:
//! - Checked 128-bit address arithmetic for both families
//! - Cancellable, deadline-aware operations
//! - In-memory reference store with revisioned change feed

pub mod agent;
pub mod allocator;
pub mod config;
pub mod context;
pub mod error;
pub mod ip;
pub mod key;
pub mod lease;
pub mod manager;
pub mod store;

// Re-export core types
pub use config::{NetworkConfig, RawNetworkConfig};
pub use context::{CancelHandle, Context};
pub use error::{Error, Result};
pub use ip::IpFamily;
pub use key::{make_subnet_key, parse_subnet_key};
pub use lease::{Event, EventType, Lease, LeaseAttrs, LeaseWatchResult, WatchPayload};
pub use manager::{LeaseManager, LocalManager, LocalManagerConfig};
pub use store::{InMemoryLeaseStore, LeaseStore, WatchBatch};
