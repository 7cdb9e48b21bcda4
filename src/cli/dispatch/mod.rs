//! Maps validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_ALLOWED_ORIGIN, ARG_PORT, commit, limits, session, token, validation};
use crate::gate::GateConfig;
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let allowed_origin = matches
        .get_one::<String>(ARG_ALLOWED_ORIGIN)
        .cloned()
        .filter(|v| !v.trim().is_empty());

    let token_opts = token::Options::parse(matches)?;
    let limits_opts = limits::Options::parse(matches)?;
    let validation_opts = validation::Options::parse(matches)?;
    let session_opts = session::Options::parse(matches)?;
    let commit_opts = commit::Options::parse(matches)?;

    let gate = GateConfig::new()
        .with_token(token_opts.config())
        .with_rate_limit(limits_opts.rate_limit)
        .with_score_rate_limit(limits_opts.score_rate_limit)
        .with_dedup(limits_opts.dedup)
        .with_validator(validation_opts.validator)
        .with_content_hash(validation_opts.content_hash)
        .with_behavior(validation_opts.behavior)
        .with_sweep_interval_seconds(limits_opts.sweep_interval_seconds);

    Ok(Action::Server(Box::new(Args {
        port,
        allowed_origin,
        token_secret: token_opts.secret,
        gate,
        session: session_opts,
        commit: commit_opts,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CLEARED: [(&str, Option<&str>); 5] = [
        ("SCOREGATE_COMMIT_URL", None),
        ("SCOREGATE_DRY_RUN", None),
        ("SCOREGATE_TOKEN_SECRET", None),
        ("SCOREGATE_DSN", None),
        ("SCOREGATE_ALLOWED_ORIGIN", None),
    ];

    #[test]
    fn commit_target_required() {
        temp_env::with_vars(CLEARED, || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["scoregate"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("missing required argument: --commit-url")
                );
            }
        });
    }

    #[test]
    fn server_args_from_flags() {
        temp_env::with_vars(CLEARED, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "scoregate",
                "--port",
                "9000",
                "--dry-run",
                "--token-secret",
                "s3cret",
                "--max-transactions",
                "2",
                "--sweep-interval-seconds",
                "15",
                "--require-content-hash",
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected a server action");
            };
            assert_eq!(args.port, 9000);
            assert!(args.token_secret.is_some());
            assert!(args.allowed_origin.is_none());
            assert_eq!(args.commit, commit::Options::DryRun);
            assert!(args.session.dsn.is_none());
            assert_eq!(args.gate.validator().max_transactions_per_request, 2);
            assert!(args.gate.content_hash().required);
            assert_eq!(args.gate.sweep_interval(), Duration::from_secs(15));
        });
    }
}
