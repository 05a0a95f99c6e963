//! Subnet allocation within the leasable range
//!
//! Enumerates the grid of per-host subnets between `SubnetMin` and
//! `SubnetMax` and finds the ones not covered by a live lease. The result is
//! only a candidate: exclusivity is decided by the lease store.

mod subnet_allocator;

pub use subnet_allocator::{SubnetAllocator, DEFAULT_MAX_CANDIDATES};
