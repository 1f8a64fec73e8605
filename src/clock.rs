// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Time source used by the client, retry loop, and orchestrator.
//!
//! Every wait in the pipeline goes through [`Clock::sleep`], so a simulated
//! clock can drive rate-limit and deadline behaviour in tests without real
//! delays.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};

/// Source of the current time and of cooperative sleeps.
pub trait Clock: Send + Sync
{
    /// Returns the current instant in UTC.
    fn now(&self,) -> DateTime<Utc,>;

    /// Suspends the caller for the given duration.
    fn sleep(&self, duration: Duration,) -> impl Future<Output = (),> + Send;

    /// Suspends the caller until `instant`, returning immediately when it has
    /// already passed.
    fn sleep_until(&self, instant: DateTime<Utc,>,) -> impl Future<Output = (),> + Send
    {
        let remaining = (instant - self.now()).to_std().unwrap_or(Duration::ZERO,);
        self.sleep(remaining,)
    }
}

/// Wall clock backed by the operating system and the tokio timer.
#[derive(Debug, Clone, Copy, Default,)]
pub struct SystemClock;

impl Clock for SystemClock
{
    fn now(&self,) -> DateTime<Utc,>
    {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration,)
    {
        if !duration.is_zero() {
            tokio::time::sleep(duration,).await;
        }
    }
}

impl<C: Clock,> Clock for &C
{
    fn now(&self,) -> DateTime<Utc,>
    {
        (**self).now()
    }

    fn sleep(&self, duration: Duration,) -> impl Future<Output = (),> + Send
    {
        (**self).sleep(duration,)
    }
}
