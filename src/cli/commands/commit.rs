use clap::{Arg, ArgAction, ArgMatches, Command};
use url::Url;

pub const ARG_COMMIT_URL: &str = "commit-url";
pub const ARG_COMMIT_TIMEOUT_SECONDS: &str = "commit-timeout-seconds";
pub const ARG_DRY_RUN: &str = "dry-run";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Options {
    /// Forward admitted scores to the chain writer relay.
    Relay { url: String, timeout_seconds: u64 },
    /// Log admitted scores instead of writing them.
    DryRun,
}

impl Options {
    /// Parse commit arguments from matches.
    ///
    /// # Errors
    /// Returns an error if neither a relay URL nor `--dry-run` is given, or the
    /// URL is not http(s). `--dry-run` takes precedence over a URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        if matches.get_flag(ARG_DRY_RUN) {
            return Ok(Self::DryRun);
        }

        let url = match matches.get_one::<String>(ARG_COMMIT_URL).cloned() {
            Some(value) if !value.trim().is_empty() => value,
            _ => anyhow::bail!("missing required argument: --{ARG_COMMIT_URL} (or --{ARG_DRY_RUN})"),
        };
        let parsed = Url::parse(&url)
            .map_err(|err| anyhow::anyhow!("invalid --{ARG_COMMIT_URL} {url}: {err}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("--{ARG_COMMIT_URL} must be an http(s) URL");
        }

        Ok(Self::Relay {
            url,
            timeout_seconds: matches
                .get_one::<u64>(ARG_COMMIT_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(30),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COMMIT_URL)
                .long(ARG_COMMIT_URL)
                .help("Chain writer relay endpoint that records admitted scores")
                .env("SCOREGATE_COMMIT_URL"),
        )
        .arg(
            Arg::new(ARG_COMMIT_TIMEOUT_SECONDS)
                .long(ARG_COMMIT_TIMEOUT_SECONDS)
                .help("Timeout for one relay call in seconds")
                .env("SCOREGATE_COMMIT_TIMEOUT_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DRY_RUN)
                .long(ARG_DRY_RUN)
                .help("Log admitted scores instead of committing them")
                .env("SCOREGATE_DRY_RUN")
                .action(ArgAction::SetTrue),
        )
}
