//! Thresholds for every admission stage.
//!
//! All policy lives here; defaults mirror the values the game client was tuned
//! against and every one of them is overridable from the CLI.

use std::time::Duration;

const DEFAULT_TOKEN_BUCKET_MS: i64 = 30 * 1000;
const DEFAULT_TOKEN_WINDOW_MS: i64 = 10 * 60 * 1000;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Salt variants accepted when re-deriving a token, in addition to the
/// request's own `ip_<addr>` salt.
pub const DEFAULT_SALT_VARIANTS: [&str; 6] = [
    "",
    "ip_check",
    "ip_localhost",
    "ip_unknown",
    "ip_127.0.0.1",
    "ip_::1",
];

#[derive(Clone, Debug)]
pub struct TokenConfig {
    /// Width of one time bucket.
    pub bucket_ms: i64,
    /// How far from now (either direction) an issued bucket is still accepted.
    pub window_ms: i64,
    pub salt_variants: Vec<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            bucket_ms: DEFAULT_TOKEN_BUCKET_MS,
            window_ms: DEFAULT_TOKEN_WINDOW_MS,
            salt_variants: DEFAULT_SALT_VARIANTS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 60 * 1000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ScoreRateLimitConfig {
    pub max_per_window: u32,
    pub window_ms: i64,
    /// Scores strictly above this value also pass through the high-value gate.
    pub high_value_threshold: i64,
    pub high_value_max: u32,
    pub high_value_window_ms: i64,
}

impl Default for ScoreRateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 1,
            window_ms: 60 * 1000,
            high_value_threshold: 500,
            high_value_max: 1,
            high_value_window_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DedupConfig {
    /// Age after which a `processing` entry is considered abandoned.
    pub processing_timeout_ms: i64,
    /// How long a completed request keeps blocking identical ones; 0 removes
    /// completed entries immediately.
    pub completed_hold_ms: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            processing_timeout_ms: 30 * 1000,
            completed_hold_ms: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ValidatorConfig {
    pub max_score_per_request: i64,
    pub max_transactions_per_request: i64,
    pub max_score_per_transaction: i64,
    pub max_score_per_second: i64,
    pub per_level_cap: i64,
    pub min_submission_interval_ms: i64,
    pub velocity_window_ms: i64,
    pub history_ttl_ms: i64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_score_per_request: 1000,
            max_transactions_per_request: 1,
            max_score_per_transaction: 500,
            max_score_per_second: 500,
            per_level_cap: 1000,
            min_submission_interval_ms: 5 * 1000,
            velocity_window_ms: 60 * 1000,
            history_ttl_ms: 10 * 60 * 1000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ContentHashConfig {
    pub max_age_ms: i64,
    pub field_width: f64,
    pub field_height: f64,
    pub required: bool,
}

impl Default for ContentHashConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 5 * 60 * 1000,
            field_width: 800.0,
            field_height: 600.0,
            required: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BehaviorConfig {
    /// A client is blocked once its signal count is strictly above this.
    pub block_threshold: usize,
    pub rapid_interval_ms: i64,
    pub rapid_min_requests: u64,
    pub profile_ttl_ms: i64,
    pub flag_missing_browser_headers: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            block_threshold: 3,
            rapid_interval_ms: 1000,
            rapid_min_requests: 5,
            profile_ttl_ms: 30 * 60 * 1000,
            flag_missing_browser_headers: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    token: TokenConfig,
    rate_limit: RateLimitConfig,
    score_rate_limit: ScoreRateLimitConfig,
    dedup: DedupConfig,
    validator: ValidatorConfig,
    content_hash: ContentHashConfig,
    behavior: BehaviorConfig,
    sweep_interval: Duration,
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: TokenConfig::default(),
            rate_limit: RateLimitConfig::default(),
            score_rate_limit: ScoreRateLimitConfig::default(),
            dedup: DedupConfig::default(),
            validator: ValidatorConfig::default(),
            content_hash: ContentHashConfig::default(),
            behavior: BehaviorConfig::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: TokenConfig) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_score_rate_limit(mut self, score_rate_limit: ScoreRateLimitConfig) -> Self {
        self.score_rate_limit = score_rate_limit;
        self
    }

    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn with_content_hash(mut self, content_hash: ContentHashConfig) -> Self {
        self.content_hash = content_hash;
        self
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.behavior = behavior;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn token(&self) -> &TokenConfig {
        &self.token
    }

    #[must_use]
    pub fn rate_limit(&self) -> RateLimitConfig {
        self.rate_limit
    }

    #[must_use]
    pub fn score_rate_limit(&self) -> ScoreRateLimitConfig {
        self.score_rate_limit
    }

    #[must_use]
    pub fn dedup(&self) -> DedupConfig {
        self.dedup
    }

    #[must_use]
    pub fn validator(&self) -> ValidatorConfig {
        self.validator
    }

    #[must_use]
    pub fn content_hash(&self) -> ContentHashConfig {
        self.content_hash
    }

    #[must_use]
    pub fn behavior(&self) -> BehaviorConfig {
        self.behavior
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}
