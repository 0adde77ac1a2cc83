// SPDX-License-Identifier: MIT
//!
//! Per-user rate limiting, keyed by `userId`. The admission decision itself
//! is `governor`'s GCRA token bucket (`RateLimiter::keyed` over a
//! `DashMapStateStore`), the same way the teacher's `AuthState` builds its
//! per-IP limiter in `sven-gateway::http::auth` — here keyed by `userId`
//! instead of `IpAddr`, and applied to every request rather than only
//! failed auth attempts. A small mirrored window counter rides alongside
//! purely to report `remaining`/`reset_at` for the `X-RateLimit-*`
//! response headers, which `governor`'s admission API doesn't expose; it
//! never itself decides `limited` — that's always `governor`'s call.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};

pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
    /// Millisecond epoch timestamp the current window resets at.
    pub reset_at: i64,
    pub limited: bool,
}

struct Bucket {
    count: u32,
    window_start: Instant,
}

type Limiter = GovernorRateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Process-local per-user rate limiter. One instance is shared by every
/// request across every session, keyed by `userId` (not by session, since
/// the quota is a per-user policy, independent of how many sessions a user
/// has open).
pub struct UserRateLimiter {
    limit: u32,
    window: Duration,
    limiter: Limiter,
    buckets: DashMap<String, Bucket>,
}

impl UserRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(limit).expect("rate limit must be > 0");
        let period = window.checked_div(limit.max(1)).unwrap_or(window);
        let quota = Quota::with_period(period).expect("window must be > 0").allow_burst(burst);
        Self {
            limit,
            window,
            limiter: GovernorRateLimiter::keyed(quota),
            buckets: DashMap::new(),
        }
    }

    /// Admit or deny via `governor`'s keyed GCRA limiter, then update the
    /// mirrored window counter used only to compute `remaining`/`reset_at`
    /// for the response headers.
    pub fn check_and_increment(&self, user_id: &str) -> RateLimitSnapshot {
        let allowed = self.limiter.check_key(&user_id.to_string()).is_ok();

        let now = Instant::now();
        let mut entry = self.buckets.entry(user_id.to_string()).or_insert_with(|| Bucket {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }
        if allowed {
            entry.count += 1;
        }
        let remaining = self.limit.saturating_sub(entry.count);
        let elapsed = now.duration_since(entry.window_start);
        let remaining_window = self.window.saturating_sub(elapsed);
        let reset_at = now_ms() + remaining_window.as_millis() as i64;
        RateLimitSnapshot { limit: self.limit, remaining, reset_at, limited: !allowed }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
