use crate::gate::config::{DedupConfig, RateLimitConfig, ScoreRateLimitConfig};
use clap::{Arg, ArgMatches, Command};

pub const ARG_RATE_LIMIT_MAX_REQUESTS: &str = "rate-limit-max-requests";
pub const ARG_RATE_LIMIT_WINDOW_MS: &str = "rate-limit-window-ms";
pub const ARG_SCORE_LIMIT_MAX: &str = "score-limit-max";
pub const ARG_SCORE_LIMIT_WINDOW_MS: &str = "score-limit-window-ms";
pub const ARG_HIGH_VALUE_THRESHOLD: &str = "high-value-threshold";
pub const ARG_HIGH_VALUE_MAX: &str = "high-value-max";
pub const ARG_HIGH_VALUE_WINDOW_MS: &str = "high-value-window-ms";
pub const ARG_DEDUP_TIMEOUT_MS: &str = "dedup-timeout-ms";
pub const ARG_DEDUP_HOLD_MS: &str = "dedup-hold-ms";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub rate_limit: RateLimitConfig,
    pub score_rate_limit: ScoreRateLimitConfig,
    pub dedup: DedupConfig,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// Parse rate limit, deduplication and sweep arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a window or timeout is not positive.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let rate_defaults = RateLimitConfig::default();
        let score_defaults = ScoreRateLimitConfig::default();
        let dedup_defaults = DedupConfig::default();

        let rate_limit = RateLimitConfig {
            max_requests: get_or(matches, ARG_RATE_LIMIT_MAX_REQUESTS, rate_defaults.max_requests),
            window_ms: positive_ms(matches, ARG_RATE_LIMIT_WINDOW_MS, rate_defaults.window_ms)?,
        };
        let score_rate_limit = ScoreRateLimitConfig {
            max_per_window: get_or(matches, ARG_SCORE_LIMIT_MAX, score_defaults.max_per_window),
            window_ms: positive_ms(matches, ARG_SCORE_LIMIT_WINDOW_MS, score_defaults.window_ms)?,
            high_value_threshold: get_or(
                matches,
                ARG_HIGH_VALUE_THRESHOLD,
                score_defaults.high_value_threshold,
            ),
            high_value_max: get_or(matches, ARG_HIGH_VALUE_MAX, score_defaults.high_value_max),
            high_value_window_ms: positive_ms(
                matches,
                ARG_HIGH_VALUE_WINDOW_MS,
                score_defaults.high_value_window_ms,
            )?,
        };
        let dedup = DedupConfig {
            processing_timeout_ms: positive_ms(
                matches,
                ARG_DEDUP_TIMEOUT_MS,
                dedup_defaults.processing_timeout_ms,
            )?,
            completed_hold_ms: get_or(matches, ARG_DEDUP_HOLD_MS, dedup_defaults.completed_hold_ms)
                .max(0),
        };

        Ok(Self {
            rate_limit,
            score_rate_limit,
            dedup,
            sweep_interval_seconds: get_or(matches, ARG_SWEEP_INTERVAL_SECONDS, 60_u64).max(1),
        })
    }
}

fn get_or<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str, default: T) -> T {
    matches.get_one::<T>(id).cloned().unwrap_or(default)
}

fn positive_ms(matches: &ArgMatches, id: &str, default: i64) -> anyhow::Result<i64> {
    let value = get_or(matches, id, default);
    if value <= 0 {
        anyhow::bail!("--{id} must be positive");
    }
    Ok(value)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_rate_limit_args(command);
    with_dedup_args(command)
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX_REQUESTS)
                .long(ARG_RATE_LIMIT_MAX_REQUESTS)
                .help("Requests allowed per client address and window")
                .env("SCOREGATE_RATE_LIMIT_MAX_REQUESTS")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_MS)
                .long(ARG_RATE_LIMIT_WINDOW_MS)
                .help("Client rate limit window in milliseconds")
                .env("SCOREGATE_RATE_LIMIT_WINDOW_MS")
                .default_value("60000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SCORE_LIMIT_MAX)
                .long(ARG_SCORE_LIMIT_MAX)
                .help("Score submissions allowed per player and window")
                .env("SCOREGATE_SCORE_LIMIT_MAX")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_SCORE_LIMIT_WINDOW_MS)
                .long(ARG_SCORE_LIMIT_WINDOW_MS)
                .help("Per-player score window in milliseconds")
                .env("SCOREGATE_SCORE_LIMIT_WINDOW_MS")
                .default_value("60000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_HIGH_VALUE_THRESHOLD)
                .long(ARG_HIGH_VALUE_THRESHOLD)
                .help("Scores above this use the high-value window as well")
                .env("SCOREGATE_HIGH_VALUE_THRESHOLD")
                .default_value("500")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_HIGH_VALUE_MAX)
                .long(ARG_HIGH_VALUE_MAX)
                .help("High-value submissions allowed per player and window")
                .env("SCOREGATE_HIGH_VALUE_MAX")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HIGH_VALUE_WINDOW_MS)
                .long(ARG_HIGH_VALUE_WINDOW_MS)
                .help("High-value window in milliseconds")
                .env("SCOREGATE_HIGH_VALUE_WINDOW_MS")
                .default_value("300000")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_dedup_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DEDUP_TIMEOUT_MS)
                .long(ARG_DEDUP_TIMEOUT_MS)
                .help("How long an in-flight request blocks identical ones, in milliseconds")
                .env("SCOREGATE_DEDUP_TIMEOUT_MS")
                .default_value("30000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_DEDUP_HOLD_MS)
                .long(ARG_DEDUP_HOLD_MS)
                .help("How long a committed request keeps blocking replays, in milliseconds (0 disables)")
                .env("SCOREGATE_DEDUP_HOLD_MS")
                .default_value("0")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between sweeps of expired gate state in seconds")
                .env("SCOREGATE_SWEEP_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}
