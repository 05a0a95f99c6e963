//! In-process lease store
//!
//! Reference implementation of [`LeaseStore`] for tests and single-host
//! deployments. All state sits behind one mutex, so create-if-absent and
//! compare-and-swap are trivially atomic. Watchers are woken through a
//! `tokio::sync::watch` channel carrying the latest revision, and the change
//! feed keeps a bounded window of recent events.

use super::{LeaseStore, WatchBatch};
use crate::key::make_subnet_key;
use crate::lease::{Event, Lease, LeaseAttrs};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Number of events retained for resuming watches
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

#[derive(Debug)]
struct StoreState {
    /// Live leases keyed by subnet key
    leases: BTreeMap<String, Lease>,
    /// Revision of the last committed change
    revision: u64,
    /// Recent changes in commit order
    history: VecDeque<(u64, Event)>,
    capacity: usize,
    /// Newest revision evicted from `history`; older cursors cannot be resumed
    compacted: u64,
}

impl StoreState {
    fn new(capacity: usize) -> Self {
        Self {
            leases: BTreeMap::new(),
            revision: 0,
            history: VecDeque::new(),
            capacity: capacity.max(1),
            compacted: 0,
        }
    }

    fn commit(&mut self, event: Event) -> u64 {
        self.revision += 1;
        self.history.push_back((self.revision, event));

        while self.history.len() > self.capacity {
            if let Some((revision, _)) = self.history.pop_front() {
                self.compacted = revision;
            }
        }

        self.revision
    }

    /// Drop leases whose expiration has passed; returns how many were removed
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(lease) = self.leases.remove(key) {
                debug!(subnet = %lease.subnet, "Lease expired");
                self.commit(Event::removed(lease));
            }
        }

        expired.len()
    }

    fn next_expiration(&self) -> Option<DateTime<Utc>> {
        self.leases.values().map(|lease| lease.expiration).min()
    }

    fn changes_after(&self, revision: u64) -> Vec<Event> {
        self.history
            .iter()
            .filter(|(rev, _)| *rev > revision)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn owned(&self, lease: &Lease) -> Result<&Lease> {
        self.leases
            .get(&lease.key())
            .filter(|current| current.asof == lease.asof)
            .ok_or(Error::LeaseNotOwned(lease.subnet))
    }
}

/// Lease store kept in process memory
#[derive(Debug)]
pub struct InMemoryLeaseStore {
    config: RwLock<String>,
    state: Mutex<StoreState>,
    revision_tx: watch::Sender<u64>,
}

impl InMemoryLeaseStore {
    /// Create a store serving the given network config document
    pub fn new(network_config: impl Into<String>) -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            config: RwLock::new(network_config.into()),
            state: Mutex::new(StoreState::new(DEFAULT_HISTORY_CAPACITY)),
            revision_tx,
        }
    }

    /// Limit how many events are kept for resuming watches
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.state.get_mut().capacity = capacity.max(1);
        self
    }

    /// Replace the network config document
    pub fn set_network_config(&self, network_config: impl Into<String>) {
        *self.config.write() = network_config.into();
    }

    /// Revision of the last committed change
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Remove expired leases now instead of on the next access
    pub fn reap_expired(&self) -> usize {
        let mut state = self.state.lock();
        self.purge(&mut state)
    }

    fn purge(&self, state: &mut StoreState) -> usize {
        let removed = state.purge_expired(Utc::now());
        if removed > 0 {
            self.revision_tx.send_replace(state.revision);
        }
        removed
    }

    fn publish(&self, revision: u64) {
        self.revision_tx.send_replace(revision);
    }
}

fn expiration_after(ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| Error::Store(format!("lease TTL out of range: {:?}", ttl)))
}

async fn sleep_until_expiry(at: Option<DateTime<Utc>>) {
    match at {
        Some(at) => {
            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn network_config(&self) -> Result<String> {
        Ok(self.config.read().clone())
    }

    async fn create_lease(
        &self,
        subnet: IpNet,
        attrs: &LeaseAttrs,
        ttl: Duration,
    ) -> Result<Lease> {
        let expiration = expiration_after(ttl)?;
        let key = make_subnet_key(&subnet);

        let mut state = self.state.lock();
        self.purge(&mut state);

        if state.leases.contains_key(&key) {
            return Err(Error::LeaseTaken(subnet));
        }

        let lease = Lease {
            subnet,
            attrs: attrs.clone(),
            expiration,
            asof: state.revision + 1,
        };
        let revision = state.commit(Event::added(lease.clone()));
        state.leases.insert(key, lease.clone());
        self.publish(revision);

        Ok(lease)
    }

    async fn update_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let expiration = expiration_after(ttl)?;

        let mut state = self.state.lock();
        self.purge(&mut state);
        state.owned(lease)?;

        let updated = Lease {
            subnet: lease.subnet,
            attrs: lease.attrs.clone(),
            expiration,
            asof: state.revision + 1,
        };
        let revision = state.commit(Event::added(updated.clone()));
        state.leases.insert(updated.key(), updated.clone());
        self.publish(revision);

        Ok(updated)
    }

    async fn delete_lease(&self, lease: &Lease) -> Result<()> {
        let mut state = self.state.lock();
        self.purge(&mut state);
        state.owned(lease)?;

        if let Some(removed) = state.leases.remove(&lease.key()) {
            let revision = state.commit(Event::removed(removed));
            self.publish(revision);
        }

        Ok(())
    }

    async fn leases(&self) -> Result<(Vec<Lease>, u64)> {
        let mut state = self.state.lock();
        self.purge(&mut state);

        Ok((state.leases.values().cloned().collect(), state.revision))
    }

    async fn watch(&self, revision: u64) -> Result<WatchBatch> {
        loop {
            // Subscribe before reading state so no commit slips in between.
            let mut rx = self.revision_tx.subscribe();

            let wake_at = {
                let mut state = self.state.lock();
                self.purge(&mut state);

                if revision < state.compacted || revision > state.revision {
                    return Ok(WatchBatch::Stale);
                }

                let events = state.changes_after(revision);
                if !events.is_empty() {
                    return Ok(WatchBatch::Events {
                        events,
                        revision: state.revision,
                    });
                }

                state.next_expiration()
            };

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::Store("lease store closed".to_string()));
                    }
                }
                _ = sleep_until_expiry(wake_at) => {}
            }
        }
    }
}
