//! Lease data model
//!
//! These types are exchanged between allocator agents and the coordination
//! store, and their JSON shape is the wire format of watch results:
//!
//! ```text
//! {"events": [{"type": "added", "lease": {...}}], "snapshot": [], "cursor": 42}
//! ```

use crate::key::make_subnet_key;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::net::IpAddr;
use std::time::Duration;

/// Routing information a lease owner publishes for its peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseAttrs {
    /// Address other hosts use to reach the owner
    pub public_ip: IpAddr,
    /// Data-plane backend that produced `backend_data`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_type: String,
    /// Backend-specific payload, passed through unmodified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_data: Option<Box<RawValue>>,
}

impl LeaseAttrs {
    pub fn new(public_ip: IpAddr) -> Self {
        Self {
            public_ip,
            backend_type: String::new(),
            backend_data: None,
        }
    }

    pub fn with_backend(
        mut self,
        backend_type: impl Into<String>,
        data: Option<Box<RawValue>>,
    ) -> Self {
        self.backend_type = backend_type.into();
        self.backend_data = data;
        self
    }
}

impl PartialEq for LeaseAttrs {
    fn eq(&self, other: &Self) -> bool {
        self.public_ip == other.public_ip
            && self.backend_type == other.backend_type
            && self.backend_data.as_ref().map(|d| d.get())
                == other.backend_data.as_ref().map(|d| d.get())
    }
}

/// Lifecycle of a lease as seen by its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Owned until the expiration passes
    Held,
    /// Expiration passed without a renewal; the subnet may belong to someone else
    Expired,
}

/// A host's time-bounded claim on one subnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub subnet: IpNet,
    pub attrs: LeaseAttrs,
    pub expiration: DateTime<Utc>,
    /// Store revision of the last write to this lease
    pub asof: u64,
}

impl Lease {
    /// Store key of this lease
    pub fn key(&self) -> String {
        make_subnet_key(&self.subnet)
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> LeaseState {
        if now < self.expiration {
            LeaseState::Held
        } else {
            LeaseState::Expired
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == LeaseState::Expired
    }

    /// Time left until expiration, `None` once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expiration - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// Kind of lease change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Added,
    Removed,
}

/// A single lease change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub lease: Lease,
}

impl Event {
    pub fn added(lease: Lease) -> Self {
        Self {
            event_type: EventType::Added,
            lease,
        }
    }

    pub fn removed(lease: Lease) -> Self {
        Self {
            event_type: EventType::Removed,
            lease,
        }
    }
}

/// Content of a watch result
#[derive(Debug, Clone, PartialEq)]
pub enum WatchPayload {
    /// Changes after the caller's cursor, in commit order; never empty
    Events(Vec<Event>),
    /// Full lease set, returned when the cursor could not be resumed
    Snapshot(Vec<Lease>),
}

/// Result of one watch call
///
/// Carries either incremental events or a snapshot, never both, plus the
/// cursor to resume from. `C` is the store's opaque cursor type.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseWatchResult<C> {
    payload: WatchPayload,
    cursor: C,
}

impl<C> LeaseWatchResult<C> {
    /// Incremental result
    pub fn from_events(events: Vec<Event>, cursor: C) -> Self {
        debug_assert!(!events.is_empty(), "event results must not be empty");
        Self {
            payload: WatchPayload::Events(events),
            cursor,
        }
    }

    /// Snapshot result
    pub fn from_snapshot(snapshot: Vec<Lease>, cursor: C) -> Self {
        Self {
            payload: WatchPayload::Snapshot(snapshot),
            cursor,
        }
    }

    pub fn payload(&self) -> &WatchPayload {
        &self.payload
    }

    /// Incremental events, empty for a snapshot result
    pub fn events(&self) -> &[Event] {
        match &self.payload {
            WatchPayload::Events(events) => events,
            WatchPayload::Snapshot(_) => &[],
        }
    }

    /// Snapshot leases, `None` for an incremental result
    pub fn snapshot(&self) -> Option<&[Lease]> {
        match &self.payload {
            WatchPayload::Events(_) => None,
            WatchPayload::Snapshot(leases) => Some(leases),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.payload, WatchPayload::Snapshot(_))
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    pub fn into_parts(self) -> (WatchPayload, C) {
        (self.payload, self.cursor)
    }
}

impl<C: Serialize> Serialize for LeaseWatchResult<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let empty: &[Lease] = &[];
        let mut state = serializer.serialize_struct("LeaseWatchResult", 3)?;
        state.serialize_field("events", self.events())?;
        state.serialize_field("snapshot", self.snapshot().unwrap_or(empty))?;
        state.serialize_field("cursor", &self.cursor)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct WatchResultWire<C> {
    #[serde(default)]
    events: Option<Vec<Event>>,
    #[serde(default)]
    snapshot: Option<Vec<Lease>>,
    cursor: C,
}

impl<'de, C: Deserialize<'de>> Deserialize<'de> for LeaseWatchResult<C> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WatchResultWire::<C>::deserialize(deserializer)?;
        let events = wire.events.unwrap_or_default();
        let snapshot = wire.snapshot.unwrap_or_default();

        match (events.is_empty(), snapshot.is_empty()) {
            (false, false) => Err(D::Error::custom(
                "watch result carries both events and a snapshot",
            )),
            (false, true) => Ok(Self::from_events(events, wire.cursor)),
            (true, _) => Ok(Self::from_snapshot(snapshot, wire.cursor)),
        }
    }
}
