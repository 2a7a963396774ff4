// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Clock capability
//!
//! The scheduler and the settle-wait loop suspend on plain timed waits.
//! Both read the time and sleep through this trait so their timing
//! behavior is unit-testable with a virtual clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}
