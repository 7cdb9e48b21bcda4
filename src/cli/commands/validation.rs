use crate::gate::config::{BehaviorConfig, ContentHashConfig, ValidatorConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_MAX_SCORE: &str = "max-score";
pub const ARG_MAX_TRANSACTIONS: &str = "max-transactions";
pub const ARG_MAX_SCORE_PER_TRANSACTION: &str = "max-score-per-transaction";
pub const ARG_MAX_SCORE_PER_SECOND: &str = "max-score-per-second";
pub const ARG_LEVEL_CAP: &str = "level-cap";
pub const ARG_MIN_SUBMISSION_INTERVAL_MS: &str = "min-submission-interval-ms";
pub const ARG_VELOCITY_WINDOW_MS: &str = "velocity-window-ms";
pub const ARG_HISTORY_TTL_MS: &str = "history-ttl-ms";
pub const ARG_CONTENT_HASH_MAX_AGE_MS: &str = "content-hash-max-age-ms";
pub const ARG_FIELD_WIDTH: &str = "field-width";
pub const ARG_FIELD_HEIGHT: &str = "field-height";
pub const ARG_REQUIRE_CONTENT_HASH: &str = "require-content-hash";
pub const ARG_BLOCK_THRESHOLD: &str = "block-threshold";
pub const ARG_RAPID_INTERVAL_MS: &str = "rapid-interval-ms";
pub const ARG_RAPID_MIN_REQUESTS: &str = "rapid-min-requests";
pub const ARG_PROFILE_TTL_MS: &str = "profile-ttl-ms";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub validator: ValidatorConfig,
    pub content_hash: ContentHashConfig,
    pub behavior: BehaviorConfig,
}

impl Options {
    /// Parse score validation and behavior arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a bound is not positive or the playfield is empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_i64 = |id: &str, default: i64| -> anyhow::Result<i64> {
            let value = matches.get_one::<i64>(id).copied().unwrap_or(default);
            if value <= 0 {
                anyhow::bail!("--{id} must be positive");
            }
            Ok(value)
        };

        let v = ValidatorConfig::default();
        let validator = ValidatorConfig {
            max_score_per_request: get_i64(ARG_MAX_SCORE, v.max_score_per_request)?,
            max_transactions_per_request: get_i64(
                ARG_MAX_TRANSACTIONS,
                v.max_transactions_per_request,
            )?,
            max_score_per_transaction: get_i64(
                ARG_MAX_SCORE_PER_TRANSACTION,
                v.max_score_per_transaction,
            )?,
            max_score_per_second: get_i64(ARG_MAX_SCORE_PER_SECOND, v.max_score_per_second)?,
            per_level_cap: get_i64(ARG_LEVEL_CAP, v.per_level_cap)?,
            min_submission_interval_ms: get_i64(
                ARG_MIN_SUBMISSION_INTERVAL_MS,
                v.min_submission_interval_ms,
            )?,
            velocity_window_ms: get_i64(ARG_VELOCITY_WINDOW_MS, v.velocity_window_ms)?,
            history_ttl_ms: get_i64(ARG_HISTORY_TTL_MS, v.history_ttl_ms)?,
        };

        let c = ContentHashConfig::default();
        let field_width = matches
            .get_one::<f64>(ARG_FIELD_WIDTH)
            .copied()
            .unwrap_or(c.field_width);
        let field_height = matches
            .get_one::<f64>(ARG_FIELD_HEIGHT)
            .copied()
            .unwrap_or(c.field_height);
        if !(field_width > 0.0 && field_height > 0.0) {
            anyhow::bail!("--{ARG_FIELD_WIDTH} and --{ARG_FIELD_HEIGHT} must be positive");
        }
        let content_hash = ContentHashConfig {
            max_age_ms: get_i64(ARG_CONTENT_HASH_MAX_AGE_MS, c.max_age_ms)?,
            field_width,
            field_height,
            required: matches.get_flag(ARG_REQUIRE_CONTENT_HASH),
        };

        let b = BehaviorConfig::default();
        let behavior = BehaviorConfig {
            block_threshold: matches
                .get_one::<usize>(ARG_BLOCK_THRESHOLD)
                .copied()
                .unwrap_or(b.block_threshold),
            rapid_interval_ms: get_i64(ARG_RAPID_INTERVAL_MS, b.rapid_interval_ms)?,
            rapid_min_requests: matches
                .get_one::<u64>(ARG_RAPID_MIN_REQUESTS)
                .copied()
                .unwrap_or(b.rapid_min_requests),
            profile_ttl_ms: get_i64(ARG_PROFILE_TTL_MS, b.profile_ttl_ms)?,
            ..b
        };

        Ok(Self {
            validator,
            content_hash,
            behavior,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_score_args(command);
    let command = with_content_hash_args(command);
    with_behavior_args(command)
}

fn i64_arg(id: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(i64))
}

fn with_score_args(command: Command) -> Command {
    command
        .arg(i64_arg(
            ARG_MAX_SCORE,
            "SCOREGATE_MAX_SCORE",
            "1000",
            "Largest score accepted in one request",
        ))
        .arg(i64_arg(
            ARG_MAX_TRANSACTIONS,
            "SCOREGATE_MAX_TRANSACTIONS",
            "1",
            "Largest transaction count accepted in one request",
        ))
        .arg(i64_arg(
            ARG_MAX_SCORE_PER_TRANSACTION,
            "SCOREGATE_MAX_SCORE_PER_TRANSACTION",
            "500",
            "Largest score allowed per transaction",
        ))
        .arg(i64_arg(
            ARG_MAX_SCORE_PER_SECOND,
            "SCOREGATE_MAX_SCORE_PER_SECOND",
            "500",
            "Fastest plausible score growth between submissions, in points per second",
        ))
        .arg(i64_arg(
            ARG_LEVEL_CAP,
            "SCOREGATE_LEVEL_CAP",
            "1000",
            "Score ceiling per reached level",
        ))
        .arg(i64_arg(
            ARG_MIN_SUBMISSION_INTERVAL_MS,
            "SCOREGATE_MIN_SUBMISSION_INTERVAL_MS",
            "5000",
            "Minimum time between submissions from one client in milliseconds",
        ))
        .arg(i64_arg(
            ARG_VELOCITY_WINDOW_MS,
            "SCOREGATE_VELOCITY_WINDOW_MS",
            "60000",
            "Window in which score growth is checked in milliseconds",
        ))
        .arg(i64_arg(
            ARG_HISTORY_TTL_MS,
            "SCOREGATE_HISTORY_TTL_MS",
            "600000",
            "How long the last submission per client is remembered in milliseconds",
        ))
}

fn with_content_hash_args(command: Command) -> Command {
    command
        .arg(i64_arg(
            ARG_CONTENT_HASH_MAX_AGE_MS,
            "SCOREGATE_CONTENT_HASH_MAX_AGE_MS",
            "300000",
            "Maximum age of a game state snapshot in milliseconds",
        ))
        .arg(
            Arg::new(ARG_FIELD_WIDTH)
                .long(ARG_FIELD_WIDTH)
                .help("Playfield width used to bound reported positions")
                .env("SCOREGATE_FIELD_WIDTH")
                .default_value("800")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_FIELD_HEIGHT)
                .long(ARG_FIELD_HEIGHT)
                .help("Playfield height used to bound reported positions")
                .env("SCOREGATE_FIELD_HEIGHT")
                .default_value("600")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_REQUIRE_CONTENT_HASH)
                .long(ARG_REQUIRE_CONTENT_HASH)
                .help("Reject submissions without a game state snapshot")
                .env("SCOREGATE_REQUIRE_CONTENT_HASH")
                .action(ArgAction::SetTrue),
        )
}

fn with_behavior_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BLOCK_THRESHOLD)
                .long(ARG_BLOCK_THRESHOLD)
                .help("Clients with more suspicion signals than this are blocked")
                .env("SCOREGATE_BLOCK_THRESHOLD")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(i64_arg(
            ARG_RAPID_INTERVAL_MS,
            "SCOREGATE_RAPID_INTERVAL_MS",
            "1000",
            "Requests closer together than this count as rapid, in milliseconds",
        ))
        .arg(
            Arg::new(ARG_RAPID_MIN_REQUESTS)
                .long(ARG_RAPID_MIN_REQUESTS)
                .help("Rapid requests are flagged once a client sent more than this many")
                .env("SCOREGATE_RAPID_MIN_REQUESTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(i64_arg(
            ARG_PROFILE_TTL_MS,
            "SCOREGATE_PROFILE_TTL_MS",
            "1800000",
            "Idle time after which a client profile is forgotten, in milliseconds",
        ))
}
