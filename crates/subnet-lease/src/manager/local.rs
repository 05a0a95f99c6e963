//! Store-backed lease manager
//!
//! Validates the config the store serves, picks candidate subnets with the
//! [`SubnetAllocator`] and relies on the store's atomic create and
//! compare-and-swap for exclusivity.

use super::LeaseManager;
use crate::allocator::{SubnetAllocator, DEFAULT_MAX_CANDIDATES};
use crate::config::NetworkConfig;
use crate::context::Context;
use crate::lease::{Event, Lease, LeaseAttrs, LeaseWatchResult};
use crate::store::{LeaseStore, WatchBatch};
use crate::{Error, Result};
use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Configuration for LocalManager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalManagerConfig {
    /// Lifetime of a lease between renewals
    #[serde(rename = "lease_ttl_secs", with = "duration_secs")]
    pub lease_ttl: Duration,
    /// Reservation attempts before giving up with `NoMoreTries`
    pub max_acquire_attempts: usize,
    /// Free subnets considered per attempt
    pub max_candidates: usize,
}

impl Default for LocalManagerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(24 * 60 * 60),
            max_acquire_attempts: 10,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

enum Attempt {
    Acquired(Lease),
    Contended,
    Exhausted,
}

/// Lease manager on top of a [`LeaseStore`]
pub struct LocalManager<S> {
    store: Arc<S>,
    config: LocalManagerConfig,
}

impl<S: LeaseStore> LocalManager<S> {
    /// Create a manager with default configuration
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, LocalManagerConfig::default())
    }

    /// Create a manager with custom configuration
    ///
    /// Attempt and candidate limits are raised to at least one.
    pub fn with_config(store: Arc<S>, mut config: LocalManagerConfig) -> Self {
        config.max_acquire_attempts = config.max_acquire_attempts.max(1);
        config.max_candidates = config.max_candidates.max(1);
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LocalManagerConfig {
        &self.config
    }

    async fn network_config(&self) -> Result<NetworkConfig> {
        let raw = self.store.network_config().await?;
        NetworkConfig::parse(&raw)
    }

    async fn try_acquire(&self, config: &NetworkConfig, attrs: &LeaseAttrs) -> Result<Attempt> {
        let (leases, _) = self.store.leases().await?;

        // A restarted agent gets its previous subnet back instead of leaking it.
        let existing = leases
            .iter()
            .find(|l| l.attrs.public_ip == attrs.public_ip && config.contains_subnet(&l.subnet));
        if let Some(existing) = existing {
            let refreshed = Lease {
                attrs: attrs.clone(),
                ..existing.clone()
            };
            return match self.store.update_lease(&refreshed, self.config.lease_ttl).await {
                Ok(lease) => {
                    info!(subnet = %lease.subnet, "Reusing existing lease");
                    Ok(Attempt::Acquired(lease))
                }
                Err(Error::LeaseNotOwned(_)) => Ok(Attempt::Contended),
                Err(e) => Err(e),
            };
        }

        let allocator = SubnetAllocator::with_leases(config, &leases);
        let Some(subnet) = allocator.pick(self.config.max_candidates) else {
            return Ok(Attempt::Exhausted);
        };

        match self
            .store
            .create_lease(subnet, attrs, self.config.lease_ttl)
            .await
        {
            Ok(lease) => Ok(Attempt::Acquired(lease)),
            Err(Error::LeaseTaken(_)) => Ok(Attempt::Contended),
            Err(e) => Err(e),
        }
    }

    async fn acquire(&self, attrs: &LeaseAttrs) -> Result<Lease> {
        let config = self.network_config().await?;
        let attempts = self.config.max_acquire_attempts;

        for attempt in 1..=attempts {
            match self.try_acquire(&config, attrs).await? {
                Attempt::Acquired(lease) => {
                    info!(subnet = %lease.subnet, attempt, "Acquired lease");
                    return Ok(lease);
                }
                Attempt::Contended => {
                    debug!(attempt, "Lost race for subnet, retrying");
                }
                Attempt::Exhausted => {
                    warn!(network = %config.network(), "No free subnets left in network");
                    return Err(Error::NoMoreTries { attempts: attempt });
                }
            }
        }

        warn!(attempts, "Giving up on lease acquisition");
        Err(Error::NoMoreTries { attempts })
    }

    async fn snapshot(&self, subnet: Option<IpNet>) -> Result<LeaseWatchResult<u64>> {
        let (leases, revision) = self.store.leases().await?;
        let leases = leases
            .into_iter()
            .filter(|l| subnet.map_or(true, |s| l.subnet == s))
            .collect();

        Ok(LeaseWatchResult::from_snapshot(leases, revision))
    }

    async fn watch(
        &self,
        subnet: Option<IpNet>,
        cursor: Option<u64>,
    ) -> Result<LeaseWatchResult<u64>> {
        let Some(mut revision) = cursor else {
            return self.snapshot(subnet).await;
        };

        loop {
            match self.store.watch(revision).await? {
                WatchBatch::Stale => {
                    debug!(revision, "Watch cursor out of range, sending snapshot");
                    return self.snapshot(subnet).await;
                }
                WatchBatch::Events { events, revision: latest } => {
                    let events: Vec<Event> = events
                        .into_iter()
                        .filter(|e| subnet.map_or(true, |s| e.lease.subnet == s))
                        .collect();

                    if !events.is_empty() {
                        return Ok(LeaseWatchResult::from_events(events, latest));
                    }
                    revision = latest;
                }
            }
        }
    }
}

#[async_trait]
impl<S: LeaseStore + 'static> LeaseManager for LocalManager<S> {
    type Cursor = u64;

    fn name(&self) -> String {
        format!("local({})", self.store.name())
    }

    async fn get_network_config(&self, ctx: &Context) -> Result<NetworkConfig> {
        ctx.run(self.network_config()).await
    }

    #[instrument(skip(self, ctx, attrs), fields(public_ip = %attrs.public_ip))]
    async fn acquire_lease(&self, ctx: &Context, attrs: &LeaseAttrs) -> Result<Lease> {
        ctx.run(self.acquire(attrs)).await
    }

    #[instrument(skip(self, ctx, attrs), fields(public_ip = %attrs.public_ip))]
    async fn acquire_subnet(
        &self,
        ctx: &Context,
        subnet: IpNet,
        attrs: &LeaseAttrs,
    ) -> Result<Lease> {
        ctx.run(async {
            let config = self.network_config().await?;
            if !config.contains_subnet(&subnet) {
                return Err(Error::SubnetOutOfRange(subnet));
            }

            let lease = self
                .store
                .create_lease(subnet, attrs, self.config.lease_ttl)
                .await?;
            info!("Acquired requested lease");
            Ok(lease)
        })
        .await
    }

    #[instrument(skip(self, ctx, lease), fields(subnet = %lease.subnet))]
    async fn renew_lease(&self, ctx: &Context, lease: &mut Lease) -> Result<()> {
        let renewed = ctx
            .run(self.store.update_lease(lease, self.config.lease_ttl))
            .await
            .map_err(|e| {
                if e.is_ownership() {
                    warn!("Lease lost, it has to be acquired again");
                }
                e
            })?;

        debug!(expiration = %renewed.expiration, "Renewed lease");
        *lease = renewed;
        Ok(())
    }

    #[instrument(skip(self, ctx, lease), fields(subnet = %lease.subnet))]
    async fn release_lease(&self, ctx: &Context, lease: &Lease) -> Result<()> {
        ctx.run(self.store.delete_lease(lease)).await?;
        info!("Released lease");
        Ok(())
    }

    async fn watch_lease(
        &self,
        ctx: &Context,
        subnet: IpNet,
        cursor: Option<u64>,
    ) -> Result<LeaseWatchResult<u64>> {
        // stored leases always carry the network address
        ctx.run(self.watch(Some(subnet.trunc()), cursor)).await
    }

    async fn watch_leases(
        &self,
        ctx: &Context,
        cursor: Option<u64>,
    ) -> Result<LeaseWatchResult<u64>> {
        ctx.run(self.watch(None, cursor)).await
    }
}
