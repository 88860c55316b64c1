//! Fixed-window rate limiting.
//!
//! Each identity (a user id or a peer address) carries a minute and an hour
//! counter. Windows restart when they elapse, so a burst straddling a window
//! boundary can reach twice the nominal rate; that is accepted behavior.

use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;

use crate::{config::RateLimitConfig, error::RateLimitError};

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Minute,
    Hour,
}

#[derive(Debug, Clone)]
pub struct RateWindow {
    minute_start: Instant,
    minute_count: u32,
    hour_start: Instant,
    hour_count: u32,
    blocked_until: Option<Instant>,
    block_kind: Option<BlockKind>,
    last_seen: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            minute_start: now,
            minute_count: 0,
            hour_start: now,
            hour_count: 0,
            blocked_until: None,
            block_kind: None,
            last_seen: now,
        }
    }

    fn reset_minute(&mut self, now: Instant) {
        self.minute_start = now;
        self.minute_count = 0;
    }

    fn reset_hour(&mut self, now: Instant) {
        self.hour_start = now;
        self.hour_count = 0;
    }

    fn block(&mut self, kind: BlockKind, until: Instant) {
        self.blocked_until = Some(until);
        self.block_kind = Some(kind);
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    pub fn minute_count(&self) -> u32 {
        self.minute_count
    }

    pub fn hour_count(&self) -> u32 {
        self.hour_count
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: HashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one call for `identity` at `now`.
    ///
    /// Blocked identities are rejected without touching their counters. When a
    /// block has expired the window that triggered it starts over.
    pub fn check(&mut self, identity: &str, now: Instant) -> Result<(), RateLimitError> {
        let window = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow::new(now));
        window.last_seen = now;

        if let Some(until) = window.blocked_until {
            if now < until {
                return Err(RateLimitError {
                    identity: identity.to_string(),
                    retry_after: until - now,
                });
            }
            window.blocked_until = None;
            match window.block_kind.take() {
                Some(BlockKind::Hour) => {
                    window.reset_hour(now);
                    window.reset_minute(now);
                }
                Some(BlockKind::Minute) | None => window.reset_minute(now),
            }
        }

        if now.duration_since(window.minute_start) >= MINUTE {
            window.reset_minute(now);
        }
        if now.duration_since(window.hour_start) >= HOUR {
            window.reset_hour(now);
        }

        window.minute_count += 1;
        window.hour_count += 1;

        let (kind, until) = if window.hour_count > self.config.per_hour {
            (BlockKind::Hour, now + HOUR)
        } else if window.minute_count > self.config.per_minute {
            (BlockKind::Minute, now + self.config.block_duration())
        } else {
            return Ok(());
        };

        window.block(kind, until);
        tracing::warn!(%identity, ?kind, retry_after_secs = (until - now).as_secs(), "Rate limit exceeded, identity blocked");
        Err(RateLimitError {
            identity: identity.to_string(),
            retry_after: until - now,
        })
    }

    pub fn is_blocked(&self, identity: &str, now: Instant) -> bool {
        self.windows
            .get(identity)
            .is_some_and(|window| window.is_blocked(now))
    }

    pub fn window(&self, identity: &str) -> Option<&RateWindow> {
        self.windows.get(identity)
    }

    /// Drops identities idle for more than an hour that are not currently blocked.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| window.is_blocked(now) || now.duration_since(window.last_seen) <= HOUR);
        before - self.windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn blocked_count(&self, now: Instant) -> usize {
        self.windows.values().filter(|w| w.is_blocked(now)).count()
    }
}
