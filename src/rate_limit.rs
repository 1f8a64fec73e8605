// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Process-local view of the hosting API request quota.
//!
//! The budget is decremented before a request leaves the process and then
//! overwritten with whatever the response headers report, so concurrent
//! callers sharing one budget cannot overshoot the quota between a send and
//! the matching response.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::ResponseHeaders;

/// Hourly quota granted to authenticated callers.
pub const AUTHENTICATED_LIMIT: u32 = 5000;
/// Hourly quota granted to anonymous callers.
pub const ANONYMOUS_LIMIT: u32 = 60;

/// Remaining requests in the current quota window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,)]
pub struct RateBudget
{
    /// Size of the quota window.
    pub limit:     u32,
    /// Requests still available before `reset_at`.
    pub remaining: u32,
    /// Instant at which the window resets.
    pub reset_at:  DateTime<Utc,>,
}

impl RateBudget
{
    /// Creates a full budget whose window is considered already reset.
    pub fn new(limit: u32, now: DateTime<Utc,>,) -> Self
    {
        Self {
            limit, remaining: limit, reset_at: now,
        }
    }

    /// Creates the initial budget for an authenticated or anonymous client.
    pub fn for_credential(authenticated: bool, now: DateTime<Utc,>,) -> Self
    {
        let limit = if authenticated { AUTHENTICATED_LIMIT } else { ANONYMOUS_LIMIT };
        Self::new(limit, now,)
    }

    /// Number of requests kept in reserve, never below one.
    pub fn floor(&self, percent: u8,) -> u32
    {
        let reserved = u64::from(self.limit,) * u64::from(percent,) / 100;
        u32::try_from(reserved,).unwrap_or(u32::MAX,).max(1,)
    }

    /// Returns the instant the caller must wait for before sending, if any.
    pub fn wait_until(&self, percent: u8, now: DateTime<Utc,>,) -> Option<DateTime<Utc,>,>
    {
        (self.remaining <= self.floor(percent,) && self.reset_at > now).then_some(self.reset_at,)
    }

    /// Reserves one request, refilling the window first when it has rolled
    /// over.
    pub fn consume(&mut self, percent: u8, now: DateTime<Utc,>,)
    {
        if self.remaining <= self.floor(percent,) && self.reset_at <= now {
            self.remaining = self.limit;
        }
        self.remaining = self.remaining.saturating_sub(1,);
    }

    /// Replaces local estimates with the values reported by the API.
    pub fn observe(&mut self, headers: &ResponseHeaders,)
    {
        if let Some(limit,) = headers.rate_limit_limit {
            self.limit = limit;
        }
        if let Some(remaining,) = headers.rate_limit_remaining {
            self.remaining = remaining;
        }
        if let Some(reset,) = headers.rate_limit_reset.and_then(epoch_seconds,) {
            self.reset_at = reset;
        }
    }
}

/// Converts a `X-RateLimit-Reset` epoch value into a UTC instant.
pub fn epoch_seconds(seconds: i64,) -> Option<DateTime<Utc,>,>
{
    Utc.timestamp_opt(seconds, 0,).single()
}

#[cfg(test)]
mod tests
{
    use chrono::Duration;

    use super::*;

    fn at(seconds: i64,) -> DateTime<Utc,>
    {
        epoch_seconds(seconds,).expect("valid timestamp",)
    }

    #[test]
    fn credential_selects_quota()
    {
        let now = at(1_700_000_000,);
        assert_eq!(RateBudget::for_credential(true, now).limit, 5000);
        assert_eq!(RateBudget::for_credential(false, now).limit, 60);
    }

    #[test]
    fn floor_is_one_percent_but_at_least_one()
    {
        let now = at(1_700_000_000,);
        assert_eq!(RateBudget::new(5000, now).floor(1), 50);
        assert_eq!(RateBudget::new(60, now).floor(1), 1);
        assert_eq!(RateBudget::new(60, now).floor(0), 1);
    }

    #[test]
    fn exhausted_budget_waits_for_reset()
    {
        let now = at(1_700_000_000,);
        let budget = RateBudget {
            limit: 5000, remaining: 0, reset_at: now + Duration::minutes(10,),
        };

        assert_eq!(budget.wait_until(1, now), Some(now + Duration::minutes(10)));
        assert_eq!(budget.wait_until(1, now + Duration::minutes(10)), None);
    }

    #[test]
    fn healthy_budget_never_waits()
    {
        let now = at(1_700_000_000,);
        let budget = RateBudget {
            limit: 5000, remaining: 51, reset_at: now + Duration::minutes(10,),
        };
        assert!(budget.wait_until(1, now).is_none());
    }

    #[test]
    fn consume_refills_after_window_rolls_over()
    {
        let now = at(1_700_000_000,);
        let mut budget = RateBudget {
            limit: 60, remaining: 0, reset_at: now,
        };

        budget.consume(1, now,);

        assert_eq!(budget.remaining, 59);
    }

    #[test]
    fn consume_decrements_before_response()
    {
        let now = at(1_700_000_000,);
        let mut budget = RateBudget::new(5000, now,);
        budget.consume(1, now,);
        budget.consume(1, now,);
        assert_eq!(budget.remaining, 4998);
    }

    #[test]
    fn observe_overrides_local_estimate()
    {
        let now = at(1_700_000_000,);
        let mut budget = RateBudget::new(60, now,);
        let headers = ResponseHeaders {
            rate_limit_limit: Some(5000,),
            rate_limit_remaining: Some(4321,),
            rate_limit_reset: Some(1_700_003_600,),
            ..ResponseHeaders::default()
        };

        budget.observe(&headers,);

        assert_eq!(budget.limit, 5000);
        assert_eq!(budget.remaining, 4321);
        assert_eq!(budget.reset_at, at(1_700_003_600));
    }
}
