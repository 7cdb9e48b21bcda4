//! Forwarding admitted submissions to the chain writer.
//!
//! The write itself happens in an external relay that holds the signing key.
//! This module only speaks to it and classifies its failures.

use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{future::Future, pin::Pin, time::Duration};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

const DEFAULT_COMMIT_TIMEOUT_SECONDS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("insufficient funds to complete transaction")]
    InsufficientFunds,
    #[error("writer is not authorized to record scores")]
    PermissionDenied,
    #[error("chain writer unreachable: {0}")]
    Connectivity(String),
    #[error("commit failed: {0}")]
    Failed(String),
}

impl CommitError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::PermissionDenied => "permission_denied",
            Self::Connectivity(_) => "commit_unavailable",
            Self::Failed(_) => "commit_failed",
        }
    }

    /// Classify an upstream error message.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("insufficient funds") {
            Self::InsufficientFunds
        } else if message.contains("AccessControlUnauthorized") || lower.contains("unauthorized") {
            Self::PermissionDenied
        } else if lower.contains("execution reverted") {
            Self::Failed("execution reverted".to_string())
        } else {
            Self::Failed(message.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub tx_hash: String,
}

pub type CommitFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<CommitReceipt, CommitError>> + Send + 'a>>;

pub trait Committer: Send + Sync {
    fn commit<'a>(&'a self, player: &'a str, score: i64, transaction_count: i64)
    -> CommitFuture<'a>;
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    player: &'a str,
    score: i64,
    transactions: i64,
}

#[derive(Debug, Deserialize)]
struct RelayError {
    error: String,
}

/// JSON relay: `POST {player, score, transactions}` → `{tx_hash}`.
#[derive(Debug, Clone)]
pub struct HttpCommitter {
    client: reqwest::Client,
    url: Url,
}

impl HttpCommitter {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(url: &str, timeout_seconds: Option<u64>) -> Result<Self> {
        let url = Url::parse(url).context("invalid commit relay URL")?;
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(
                timeout_seconds.unwrap_or(DEFAULT_COMMIT_TIMEOUT_SECONDS),
            ))
            .build()
            .context("failed to build commit client")?;
        Ok(Self { client, url })
    }

    async fn send(
        &self,
        player: &str,
        score: i64,
        transaction_count: i64,
    ) -> std::result::Result<CommitReceipt, CommitError> {
        let body = CommitRequest {
            player,
            score,
            transactions: transaction_count,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() || err.is_timeout() {
                    CommitError::Connectivity(err.to_string())
                } else {
                    CommitError::Failed(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let receipt = response
                .json::<CommitReceipt>()
                .await
                .map_err(|err| CommitError::Failed(format!("invalid relay response: {err}")))?;
            return Ok(receipt);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RelayError>(&text)
            .map(|relay| relay.error)
            .unwrap_or(text);
        debug!(status = status.as_u16(), "commit relay returned an error");

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(CommitError::PermissionDenied);
        }
        if status.is_server_error() && message.trim().is_empty() {
            return Err(CommitError::Connectivity(format!("relay returned {status}")));
        }
        Err(CommitError::from_message(&message))
    }
}

impl Committer for HttpCommitter {
    fn commit<'a>(
        &'a self,
        player: &'a str,
        score: i64,
        transaction_count: i64,
    ) -> CommitFuture<'a> {
        let span = info_span!("commit", player, score, transaction_count);
        Box::pin(
            async move {
                let result = self.send(player, score, transaction_count).await;
                match &result {
                    Ok(receipt) => info!(tx_hash = %receipt.tx_hash, "score committed"),
                    Err(err) => warn!(error = %err, "score commit failed"),
                }
                result
            }
            .instrument(span),
        )
    }
}

/// Logs instead of writing. Only wired when explicitly requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunCommitter;

impl Committer for DryRunCommitter {
    fn commit<'a>(
        &'a self,
        player: &'a str,
        score: i64,
        transaction_count: i64,
    ) -> CommitFuture<'a> {
        Box::pin(async move {
            info!(player, score, transaction_count, "dry run: score not committed");
            let digest = crate::gate::dedup::request_id(player, score, transaction_count);
            Ok(CommitReceipt {
                tx_hash: format!("0x{digest}"),
            })
        })
    }
}
