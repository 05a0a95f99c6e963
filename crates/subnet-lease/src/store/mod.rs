//! Coordination store contract
//!
//! The lease manager never decides ownership on its own; it delegates every
//! reservation to a store that provides atomic primitives:
//!
//! - create-if-absent for new leases (mutual exclusion across agents)
//! - compare-and-swap on the lease revision for renewals and releases
//! - a revision-ordered change feed with bounded history for watches
//!
//! A production adapter maps these onto a distributed key-value store with
//! TTL support, keyed by [`crate::key::make_subnet_key`].

mod memory;

pub use memory::{InMemoryLeaseStore, DEFAULT_HISTORY_CAPACITY};

use crate::lease::{Event, Lease, LeaseAttrs};
use crate::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use std::time::Duration;

/// Outcome of a store watch
#[derive(Debug, Clone, PartialEq)]
pub enum WatchBatch {
    /// Changes committed after the requested revision, in commit order
    Events { events: Vec<Event>, revision: u64 },
    /// The requested revision is no longer (or not yet) covered by the change feed
    Stale,
}

/// Backing store for leases
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Store name for logs
    fn name(&self) -> &str;

    /// Raw network config document
    async fn network_config(&self) -> Result<String>;

    /// Create a lease for `subnet` unless a live lease already holds it
    ///
    /// Fails with [`crate::Error::LeaseTaken`] when the subnet is held.
    async fn create_lease(
        &self,
        subnet: IpNet,
        attrs: &LeaseAttrs,
        ttl: Duration,
    ) -> Result<Lease>;

    /// Rewrite attrs and extend the expiration of a lease the caller owns
    ///
    /// Succeeds only if the stored lease still has the caller's `asof`;
    /// otherwise fails with [`crate::Error::LeaseNotOwned`].
    async fn update_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease>;

    /// Remove a lease the caller owns, with the same ownership check as `update_lease`
    async fn delete_lease(&self, lease: &Lease) -> Result<()>;

    /// All live leases and the revision they were read at
    async fn leases(&self) -> Result<(Vec<Lease>, u64)>;

    /// Wait for changes committed after `revision`
    ///
    /// Blocks until at least one change is available. Must be cancel-safe:
    /// dropping the future leaves the store untouched.
    async fn watch(&self, revision: u64) -> Result<WatchBatch>;
}
