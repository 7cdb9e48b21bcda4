use crate::{
    api,
    cli::commands::{commit, session},
    gate::{
        AdmissionPipeline, GateConfig,
        clock::SystemClock,
        commit::{Committer, DryRunCommitter, HttpCommitter},
        session::{MemorySessionStore, PgSessionStore, SessionStore},
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub allowed_origin: Option<String>,
    pub token_secret: Option<SecretString>,
    pub gate: GateConfig,
    pub session: session::Options,
    pub commit: commit::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the session store or commit client cannot be set up, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store: Arc<dyn SessionStore> = match &args.session.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(args.session.max_connections)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgSessionStore::new(pool, args.session.ttl_seconds))
        }
        None => {
            warn!("No --dsn given, sessions are kept in memory and lost on restart");
            Arc::new(MemorySessionStore::new(args.session.ttl_seconds))
        }
    };

    let committer: Arc<dyn Committer> = match &args.commit {
        commit::Options::Relay {
            url,
            timeout_seconds,
        } => Arc::new(HttpCommitter::new(url, Some(*timeout_seconds))?),
        commit::Options::DryRun => {
            warn!("Dry run: admitted scores are logged, not committed");
            Arc::new(DryRunCommitter)
        }
    };

    if args.token_secret.is_none() {
        warn!("No token secret configured, every submission will be rejected");
    }

    let sweep_interval = args.gate.sweep_interval();
    let pipeline = Arc::new(AdmissionPipeline::new(
        args.gate,
        args.token_secret,
        store,
        Arc::new(SystemClock),
    ));

    api::new(
        args.port,
        pipeline,
        committer,
        args.allowed_origin.as_deref(),
        sweep_interval,
    )
    .await
}

fn log_startup_args(args: &Args) {
    let validator = args.gate.validator();
    let rate_limit = args.gate.rate_limit();
    let score_rate_limit = args.gate.score_rate_limit();
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "session_store",
            args.session
                .dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("session_ttl_seconds", args.session.ttl_seconds.to_string()),
        (
            "commit",
            match &args.commit {
                commit::Options::Relay { url, .. } => url.clone(),
                commit::Options::DryRun => "dry-run".to_string(),
            },
        ),
        ("token_secret_set", args.token_secret.is_some().to_string()),
        (
            "allowed_origin",
            args.allowed_origin
                .clone()
                .unwrap_or_else(|| "any".to_string()),
        ),
        (
            "rate_limit",
            format!("{}/{}ms", rate_limit.max_requests, rate_limit.window_ms),
        ),
        (
            "score_rate_limit",
            format!(
                "{}/{}ms (>{}: {}/{}ms)",
                score_rate_limit.max_per_window,
                score_rate_limit.window_ms,
                score_rate_limit.high_value_threshold,
                score_rate_limit.high_value_max,
                score_rate_limit.high_value_window_ms
            ),
        ),
        (
            "max_score",
            format!(
                "{} ({} per transaction)",
                validator.max_score_per_request, validator.max_score_per_transaction
            ),
        ),
        (
            "content_hash_required",
            args.gate.content_hash().required.to_string(),
        ),
        (
            "block_threshold",
            args.gate.behavior().block_threshold.to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = crate::short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

const BANNER: &str = r"
  +-------+
  | 00042 |
  +---+---+
      |
  ----+----  S C O R E G A T E {VERSION}";
