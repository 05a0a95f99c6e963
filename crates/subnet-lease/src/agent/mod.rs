//! Long-running agent loops
//!
//! Building blocks for a network agent that holds one subnet and keeps a
//! view of everybody else's:
//!
//! - [`keep_lease`] renews the agent's own lease ahead of its expiration.
//! - [`watch_leases`] long-polls the manager and feeds peer changes into a
//!   channel, resynchronizing from snapshots when the cursor goes stale.

mod renew;
mod watch;

pub use renew::{keep_lease, RenewConfig};
pub use watch::{spawn_watcher, watch_leases, LeaseWatcher, WatchConfig};
