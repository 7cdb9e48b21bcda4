use crate::gate::session::DEFAULT_SESSION_TTL_SECONDS;
use clap::{Arg, ArgMatches, Command};

pub const ARG_DSN: &str = "dsn";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_DB_MAX_CONNECTIONS: &str = "db-max-connections";

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` keeps sessions in memory.
    pub dsn: Option<String>,
    pub ttl_seconds: i64,
    pub max_connections: u32,
}

impl Options {
    /// Parse session storage arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the TTL or pool size is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .cloned()
            .filter(|v| !v.trim().is_empty());

        let ttl_seconds = matches
            .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
            .copied()
            .unwrap_or(DEFAULT_SESSION_TTL_SECONDS);
        if ttl_seconds <= 0 {
            anyhow::bail!("--{ARG_SESSION_TTL_SECONDS} must be positive");
        }

        let max_connections = matches
            .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
            .copied()
            .unwrap_or(5);
        if max_connections == 0 {
            anyhow::bail!("--{ARG_DB_MAX_CONNECTIONS} must be at least 1");
        }

        Ok(Self {
            dsn,
            ttl_seconds,
            max_connections,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("PostgreSQL connection string for the session store")
                .long_help(
                    "PostgreSQL connection string for the session store.\n\nWhen omitted sessions are kept in process memory and lost on restart.",
                )
                .env("SCOREGATE_DSN"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds, fixed at creation")
                .env("SCOREGATE_SESSION_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_DB_MAX_CONNECTIONS)
                .long(ARG_DB_MAX_CONNECTIONS)
                .help("Maximum PostgreSQL pool connections")
                .env("SCOREGATE_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}
