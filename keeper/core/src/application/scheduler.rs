// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Renewal scheduler
//!
//! Computes the instant at which the next renewal must run and drives
//! either a one-shot check or the perpetual renew loop. The renewal
//! instant is a pure function of the certificate expiry and the policy, so
//! restarts land on the same deadline.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::certificate::StoreError;
use crate::domain::clock::Clock;
use crate::domain::config::RenewalPolicy;
use crate::domain::{acme::AcmeError, fleet::FleetError};

/// Wait applied when the computed deadline has already passed, so a late
/// restart renews promptly without a tight loop.
const FALLBACK_DELAY: Duration = Duration::from_secs(10);

/// Fixed interval between renewals in test mode.
const TEST_MODE_INTERVAL: Duration = Duration::from_secs(120);

/// The renew step the scheduler drives. Returns the new expiry date on
/// success; any error is fatal for the process.
#[async_trait]
pub trait Renewer: Send {
    async fn renew(&mut self) -> Result<DateTime<Utc>, RenewError>;
}

#[derive(Debug, Error)]
pub enum RenewError {
    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fleet(#[from] FleetError),
}

/// The instant at which the certificate expiring at `expiry` must be
/// renewed: `lead_days` before expiry, truncated to the UTC calendar day,
/// at `renewal_hour:00:00`.
pub fn next_renewal_instant(expiry: DateTime<Utc>, policy: &RenewalPolicy) -> DateTime<Utc> {
    let date = (expiry - TimeDelta::days(policy.lead_days)).date_naive();
    let time = NaiveTime::from_hms_opt(policy.renewal_hour, 0, 0)
        .expect("renewal hour is validated at startup");
    date.and_time(time).and_utc()
}

pub struct RenewalScheduler {
    policy: RenewalPolicy,
    clock: Arc<dyn Clock>,
}

impl RenewalScheduler {
    pub fn new(policy: RenewalPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// Drive renewals forever, or evaluate once if the policy says so.
    ///
    /// Loop mode never returns under normal operation; a renewal error is
    /// fatal and propagates to the process boundary.
    pub async fn run(
        &self,
        initial_expiry: DateTime<Utc>,
        renewer: &mut dyn Renewer,
    ) -> Result<(), RenewError> {
        if self.policy.run_once {
            let next = next_renewal_instant(initial_expiry, &self.policy);
            if self.clock.now() >= next {
                info!("certificate renewal is due, renewing now");
                renewer.renew().await?;
            } else {
                info!(due = %next.format("%Y/%m/%d %H:%M UTC"), "certificate not yet due for renewal");
            }
            return Ok(());
        }

        let mut expiry = initial_expiry;
        loop {
            let next = next_renewal_instant(expiry, &self.policy);
            let wait = self.delay_until(next);
            info!(
                scheduled = %next.format("%Y/%m/%d %H:%M UTC"),
                "next certificate renewal scheduled"
            );
            self.clock.sleep(wait).await;
            expiry = renewer.renew().await?;
        }
    }

    /// How long to wait before the renewal at `next`. Never zero or
    /// negative: a past deadline yields the fixed fallback delay.
    fn delay_until(&self, next: DateTime<Utc>) -> Duration {
        if self.policy.test_mode {
            debug!("test mode enabled: certificate renewal in 120 seconds");
            return TEST_MODE_INTERVAL;
        }
        let left = next - self.clock.now();
        if left <= TimeDelta::zero() {
            return FALLBACK_DELAY;
        }
        left.to_std().unwrap_or(FALLBACK_DELAY)
    }
}
