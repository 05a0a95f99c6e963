//! Peer lease watching
//!
//! [`LeaseWatcher`] keeps the set of leases held by other agents and turns
//! both snapshot and incremental watch results into plain event batches, so
//! a consumer programming routes never has to care which kind arrived.

use crate::context::Context;
use crate::lease::{Event, EventType, Lease, WatchPayload};
use crate::manager::LeaseManager;
use crate::Result;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Watch loop tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Delay before retrying a failed watch call
    pub retry_interval: Duration,
    /// Event batches buffered for a slow consumer
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            channel_capacity: 100,
        }
    }
}

/// View of the leases held by other agents
#[derive(Debug, Clone, Default)]
pub struct LeaseWatcher {
    own_subnet: Option<IpNet>,
    /// Known leases keyed by subnet key
    leases: BTreeMap<String, Lease>,
}

impl LeaseWatcher {
    /// Create a watcher ignoring the agent's own subnet, if it has one
    pub fn new(own_subnet: Option<IpNet>) -> Self {
        Self {
            own_subnet,
            leases: BTreeMap::new(),
        }
    }

    fn is_own(&self, lease: &Lease) -> bool {
        self.own_subnet == Some(lease.subnet)
    }

    /// Replace the known set with `snapshot`
    ///
    /// Returns `Removed` for leases that disappeared and `Added` for leases
    /// that are new or whose attributes changed.
    pub fn reset(&mut self, snapshot: &[Lease]) -> Vec<Event> {
        let mut current: BTreeMap<String, Lease> = snapshot
            .iter()
            .filter(|lease| !self.is_own(lease))
            .map(|lease| (lease.key(), lease.clone()))
            .collect();

        let mut batch: Vec<Event> = self
            .leases
            .iter()
            .filter(|(key, _)| !current.contains_key(*key))
            .map(|(_, lease)| Event::removed(lease.clone()))
            .collect();

        batch.extend(
            current
                .iter()
                .filter(|(key, lease)| {
                    self.leases
                        .get(*key)
                        .map_or(true, |known| known.attrs != lease.attrs)
                })
                .map(|(_, lease)| Event::added(lease.clone())),
        );

        std::mem::swap(&mut self.leases, &mut current);
        batch
    }

    /// Apply incremental events, returning those about other agents
    pub fn update(&mut self, events: &[Event]) -> Vec<Event> {
        let mut batch = Vec::with_capacity(events.len());

        for event in events {
            if self.is_own(&event.lease) {
                continue;
            }

            let key = event.lease.key();
            match event.event_type {
                EventType::Added => {
                    self.leases.insert(key, event.lease.clone());
                }
                EventType::Removed => {
                    self.leases.remove(&key);
                }
            }
            batch.push(event.clone());
        }

        batch
    }

    /// Known peer leases in subnet key order
    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// Feed peer lease changes into `tx` until the context ends
///
/// Starts from a snapshot, then follows the manager's cursor. Failed watch
/// calls are retried after `retry_interval` from the same cursor. Returns
/// `Ok` once the receiver is dropped and the context's error on
/// cancellation or deadline.
pub async fn watch_leases<M>(
    manager: &M,
    ctx: &Context,
    own_subnet: Option<IpNet>,
    tx: mpsc::Sender<Vec<Event>>,
    config: &WatchConfig,
) -> Result<()>
where
    M: LeaseManager + ?Sized,
{
    let mut watcher = LeaseWatcher::new(own_subnet);
    let mut cursor: Option<M::Cursor> = None;

    loop {
        let result = tokio::select! {
            res = manager.watch_leases(ctx, cursor.clone()) => res,
            _ = tx.closed() => return Ok(()),
        };

        let result = match result {
            Ok(result) => result,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!(manager = %manager.name(), error = %e, "Watch failed, retrying");
                ctx.sleep(config.retry_interval).await?;
                continue;
            }
        };

        let (payload, next) = result.into_parts();
        let batch = match payload {
            WatchPayload::Snapshot(leases) => {
                debug!(leases = leases.len(), "Resynchronizing from snapshot");
                watcher.reset(&leases)
            }
            WatchPayload::Events(events) => watcher.update(&events),
        };
        cursor = Some(next);

        if !batch.is_empty() && tx.send(batch).await.is_err() {
            return Ok(());
        }
    }
}

/// Run [`watch_leases`] on a background task
///
/// The watch stops when the returned receiver is dropped or `ctx` ends.
pub fn spawn_watcher<M>(
    manager: Arc<M>,
    ctx: Context,
    own_subnet: Option<IpNet>,
    config: WatchConfig,
) -> (mpsc::Receiver<Vec<Event>>, JoinHandle<Result<()>>)
where
    M: LeaseManager + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

    let handle = tokio::spawn(async move {
        watch_leases(&*manager, &ctx, own_subnet, tx, &config).await
    });

    (rx, handle)
}
