//! Lease manager contract
//!
//! Network agents obtain and keep their subnet through a [`LeaseManager`]:
//!
//! ```text
//!   get_network_config ──► acquire_lease ──► renew_lease (every few hours)
//!                                  │
//!                                  └──► watch_leases (long poll, forever)
//! ```
//!
//! Implementations translate the contract onto a coordination store. Mutual
//! exclusion between agents is a store property; the manager treats losing a
//! race as normal and retries a bounded number of times.

mod local;

pub use local::{LocalManager, LocalManagerConfig};

use crate::config::NetworkConfig;
use crate::context::Context;
use crate::lease::{Lease, LeaseAttrs, LeaseWatchResult};
use crate::Result;
use async_trait::async_trait;
use ipnet::IpNet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Lease coordination operations used by network agents
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Opaque watch position; only compared and passed back by callers
    type Cursor: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Implementation name for logs
    fn name(&self) -> String;

    /// Currently active, validated network config
    async fn get_network_config(&self, ctx: &Context) -> Result<NetworkConfig>;

    /// Obtain a free subnet for `attrs`
    ///
    /// Fails with [`crate::Error::NoMoreTries`] when no subnet could be
    /// reserved within the retry budget.
    async fn acquire_lease(&self, ctx: &Context, attrs: &LeaseAttrs) -> Result<Lease>;

    /// Obtain one specific subnet
    ///
    /// Fails with [`crate::Error::LeaseTaken`] when another live lease holds it.
    async fn acquire_subnet(
        &self,
        ctx: &Context,
        subnet: IpNet,
        attrs: &LeaseAttrs,
    ) -> Result<Lease>;

    /// Extend the expiration of an owned lease, updating it in place
    ///
    /// [`crate::Error::LeaseNotOwned`] is terminal for this lease; the caller
    /// has to acquire a new one.
    async fn renew_lease(&self, ctx: &Context, lease: &mut Lease) -> Result<()>;

    /// Give up an owned lease before it expires
    async fn release_lease(&self, ctx: &Context, lease: &Lease) -> Result<()>;

    /// Wait for a change to the lease of one subnet after `cursor`
    ///
    /// A missing or stale cursor yields a snapshot holding at most that lease.
    async fn watch_lease(
        &self,
        ctx: &Context,
        subnet: IpNet,
        cursor: Option<Self::Cursor>,
    ) -> Result<LeaseWatchResult<Self::Cursor>>;

    /// Wait for a change to any lease after `cursor`
    ///
    /// A missing or stale cursor yields a snapshot of all live leases.
    async fn watch_leases(
        &self,
        ctx: &Context,
        cursor: Option<Self::Cursor>,
    ) -> Result<LeaseWatchResult<Self::Cursor>>;
}
