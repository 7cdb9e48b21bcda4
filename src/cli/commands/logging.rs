use crate::cli::telemetry::LogFormat;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command, builder::ValueParser};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>()
            && parsed <= 5
        {
            return Ok(parsed);
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("SCOREGATE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("SCOREGATE_LOG_FORMAT")
                .global(true)
                .default_value(LogFormat::Pretty.as_str())
                .value_parser(LogFormat::VARIANTS),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// `None` keeps the default (errors only).
    pub level: Option<Level>,
    pub format: LogFormat,
}

impl Options {
    /// # Errors
    /// Returns an error if the log format is not recognized.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
        let format = matches
            .get_one::<String>(ARG_LOG_FORMAT)
            .map_or(Ok(LogFormat::default()), |format| format.parse())?;

        Ok(Self {
            level: verbosity_level(verbosity),
            format,
        })
    }
}

const fn verbosity_level(verbosity: u8) -> Option<Level> {
    match verbosity {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}
