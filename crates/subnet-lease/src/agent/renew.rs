//! Lease renewal loop

use crate::context::Context;
use crate::lease::Lease;
use crate::manager::LeaseManager;
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// Renewal timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewConfig {
    /// How long before expiration the lease is renewed; keep it below the lease TTL
    pub renew_margin: Duration,
    /// Delay before retrying a failed renewal
    pub retry_interval: Duration,
}

impl Default for RenewConfig {
    fn default() -> Self {
        Self {
            renew_margin: Duration::from_secs(60 * 60),
            retry_interval: Duration::from_secs(60),
        }
    }
}

/// Time to wait before the next renewal
///
/// A margin that does not fit in the remaining lifetime falls back to half
/// of it, so renewals never run back to back.
fn renew_delay(lease: &Lease, margin: Duration, now: DateTime<Utc>) -> Duration {
    match lease.remaining_at(now) {
        Some(remaining) if remaining > margin => remaining - margin,
        Some(remaining) => remaining / 2,
        None => Duration::ZERO,
    }
}

/// Keep `lease` alive until the context ends or the lease is lost
///
/// Renews `renew_margin` before each expiration and retries failed renewals
/// every `retry_interval`. Never returns `Ok`: the loop ends with
/// `LeaseNotOwned` when another agent took the subnet, or with the context's
/// cancellation error. `lease` always holds the latest renewed instance.
pub async fn keep_lease<M>(
    manager: &M,
    ctx: &Context,
    lease: &mut Lease,
    config: &RenewConfig,
) -> Result<()>
where
    M: LeaseManager + ?Sized,
{
    let now = Utc::now();
    if lease
        .remaining_at(now)
        .is_some_and(|remaining| remaining <= config.renew_margin)
    {
        warn!(
            subnet = %lease.subnet,
            renew_margin = ?config.renew_margin,
            "Renew margin exceeds the lease lifetime, renewing at half-life instead"
        );
    }
    let mut delay = renew_delay(lease, config.renew_margin, now);

    loop {
        ctx.sleep(delay).await?;

        match manager.renew_lease(ctx, lease).await {
            Ok(()) => {
                info!(subnet = %lease.subnet, expiration = %lease.expiration, "Lease renewed");
                delay = renew_delay(lease, config.renew_margin, Utc::now());
            }
            Err(e) if e.is_ownership() || e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!(subnet = %lease.subnet, error = %e, "Failed to renew lease, retrying");
                delay = config.retry_interval;
            }
        }
    }
}
