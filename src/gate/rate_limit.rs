//! Fixed-window rate limiting.
//!
//! Counters live in a sharded [`DashMap`]; the reset-or-increment step runs
//! under the entry's shard lock so two concurrent requests for the same key
//! can never both observe a fresh window.

use crate::gate::config::{RateLimitConfig, ScoreRateLimitConfig};
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Unix ms after which the window starts over.
    pub reset_at: i64,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: i64,
}

#[derive(Debug, Default)]
pub struct WindowCounters {
    windows: DashMap<String, Window>,
}

impl WindowCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `key` and decide whether it fits in the window.
    pub fn check(&self, key: &str, max: u32, window_ms: i64, now: i64) -> RateDecision {
        if max == 0 {
            return RateDecision {
                allowed: false,
                reset_at: now + window_ms,
                remaining: 0,
            };
        }

        match self.windows.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let window = vacant.insert(Window {
                    count: 1,
                    reset_at: now + window_ms,
                });
                RateDecision {
                    allowed: true,
                    reset_at: window.reset_at,
                    remaining: max - 1,
                }
            }
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                if now > window.reset_at {
                    window.count = 1;
                    window.reset_at = now + window_ms;
                } else if window.count < max {
                    window.count += 1;
                } else {
                    return RateDecision {
                        allowed: false,
                        reset_at: window.reset_at,
                        remaining: 0,
                    };
                }
                RateDecision {
                    allowed: true,
                    reset_at: window.reset_at,
                    remaining: max.saturating_sub(window.count),
                }
            }
        }
    }

    /// Drop windows that have already ended. Returns how many were removed.
    pub fn sweep(&self, now: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at >= now);
        before.saturating_sub(self.windows.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// General request limiter, keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    counters: WindowCounters,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            counters: WindowCounters::new(),
            config,
        }
    }

    pub fn check(&self, key: &str, now: i64) -> RateDecision {
        let decision =
            self.counters
                .check(key, self.config.max_requests, self.config.window_ms, now);
        if !decision.allowed {
            debug!(key, reset_at = decision.reset_at, "request rate limit exceeded");
        }
        decision
    }

    pub fn sweep(&self, now: i64) -> usize {
        self.counters.sweep(now)
    }
}

/// Score submission limiter, keyed by player.
///
/// Scores above the high-value threshold must first pass a slower gate, then
/// the baseline window like every other submission.
#[derive(Debug)]
pub struct ScoreRateLimiter {
    baseline: WindowCounters,
    high_value: WindowCounters,
    config: ScoreRateLimitConfig,
}

impl ScoreRateLimiter {
    #[must_use]
    pub fn new(config: ScoreRateLimitConfig) -> Self {
        Self {
            baseline: WindowCounters::new(),
            high_value: WindowCounters::new(),
            config,
        }
    }

    pub fn check(&self, player: &str, score: i64, now: i64) -> RateDecision {
        if score > self.config.high_value_threshold {
            let decision = self.high_value.check(
                player,
                self.config.high_value_max,
                self.config.high_value_window_ms,
                now,
            );
            if !decision.allowed {
                debug!(player, score, "high-value score rate limit exceeded");
                return decision;
            }
        }

        let decision = self.baseline.check(
            player,
            self.config.max_per_window,
            self.config.window_ms,
            now,
        );
        if !decision.allowed {
            debug!(player, "score rate limit exceeded");
        }
        decision
    }

    pub fn sweep(&self, now: i64) -> usize {
        self.baseline.sweep(now) + self.high_value.sweep(now)
    }
}
