use crate::gate::config::TokenConfig;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_BUCKET_MS: &str = "token-bucket-ms";
pub const ARG_TOKEN_WINDOW_MS: &str = "token-window-ms";

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` keeps the service up but every submission is refused.
    pub secret: Option<SecretString>,
    pub bucket_ms: i64,
    pub window_ms: i64,
}

impl Options {
    /// Parse session token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the bucket is not positive or wider than the window.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        let defaults = TokenConfig::default();
        let bucket_ms = matches
            .get_one::<i64>(ARG_TOKEN_BUCKET_MS)
            .copied()
            .unwrap_or(defaults.bucket_ms);
        let window_ms = matches
            .get_one::<i64>(ARG_TOKEN_WINDOW_MS)
            .copied()
            .unwrap_or(defaults.window_ms);

        if bucket_ms <= 0 {
            anyhow::bail!("--{ARG_TOKEN_BUCKET_MS} must be positive");
        }
        if window_ms < bucket_ms {
            anyhow::bail!("--{ARG_TOKEN_WINDOW_MS} must be at least --{ARG_TOKEN_BUCKET_MS}");
        }

        Ok(Self {
            secret,
            bucket_ms,
            window_ms,
        })
    }

    #[must_use]
    pub fn config(&self) -> TokenConfig {
        TokenConfig {
            bucket_ms: self.bucket_ms,
            window_ms: self.window_ms,
            ..TokenConfig::default()
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Server secret used to derive session tokens")
                .long_help(
                    "Server secret used to derive session tokens.\n\nWithout it the service starts but rejects every submission.",
                )
                .env("SCOREGATE_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_BUCKET_MS)
                .long(ARG_TOKEN_BUCKET_MS)
                .help("Width of a session token time bucket in milliseconds")
                .env("SCOREGATE_TOKEN_BUCKET_MS")
                .default_value("30000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_WINDOW_MS)
                .long(ARG_TOKEN_WINDOW_MS)
                .help("How long a session token stays acceptable in milliseconds")
                .env("SCOREGATE_TOKEN_WINDOW_MS")
                .default_value("600000")
                .value_parser(clap::value_parser!(i64)),
        )
}
