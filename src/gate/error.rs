//! Rejection reasons and infrastructure errors produced by the admission gate.

use serde::Serialize;
use std::fmt;

/// Which plausibility rule a submission broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("score and transaction count must not be negative")]
    Negative,
    #[error("score exceeds the per-request maximum")]
    ScoreTooLarge,
    #[error("too many transactions in one request")]
    TooManyTransactions,
    #[error("score per transaction exceeds the allowed ratio")]
    RatioExceeded,
    #[error("submitted score does not match the game state")]
    ScoreMismatch,
    #[error("score exceeds the ceiling for the declared level")]
    LevelCeiling,
    #[error("level does not match the recorded game state")]
    LevelMismatch,
    #[error("submissions are arriving too quickly")]
    RapidSubmission,
    #[error("score is increasing faster than possible")]
    ScoreJump,
    #[error("game state snapshot is stale or from the future")]
    StaleContentHash,
    #[error("player position is outside the playfield")]
    PositionOutOfBounds,
    #[error("game state snapshot is required")]
    MissingContentHash,
    #[error("game state snapshot is missing required fields")]
    InvalidContentHash,
    #[error("session does not exist or has expired")]
    UnknownSession,
    #[error("session belongs to another player")]
    SessionOwnerMismatch,
}

impl ValidationFailure {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Negative => "negative_value",
            Self::ScoreTooLarge => "score_too_large",
            Self::TooManyTransactions => "too_many_transactions",
            Self::RatioExceeded => "ratio_exceeded",
            Self::ScoreMismatch => "score_mismatch",
            Self::LevelCeiling => "level_ceiling",
            Self::LevelMismatch => "level_mismatch",
            Self::RapidSubmission => "rapid_submission",
            Self::ScoreJump => "score_jump",
            Self::StaleContentHash => "stale_content_hash",
            Self::PositionOutOfBounds => "position_out_of_bounds",
            Self::MissingContentHash => "missing_content_hash",
            Self::InvalidContentHash => "invalid_content_hash",
            Self::UnknownSession => "unknown_session",
            Self::SessionOwnerMismatch => "session_owner_mismatch",
        }
    }
}

/// Why a submission was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("invalid or expired session token")]
    Authentication,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("an identical request is already being processed")]
    Duplicate,
    #[error("validation failed: {0}")]
    Validation(ValidationFailure),
    // Never name the signals that fired.
    #[error("request blocked")]
    BehaviorBlock,
    #[error("service is not configured to accept submissions")]
    Configuration,
}

impl RejectReason {
    /// Stable machine-readable code used in responses and logs.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::RateLimited => "rate_limited",
            Self::Duplicate => "duplicate",
            Self::Validation(_) => "validation",
            Self::BehaviorBlock => "behavior_block",
            Self::Configuration => "configuration",
        }
    }
}

/// Pipeline position a rejection happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    DedupChecked,
    RateChecked,
    Authenticated,
    ScoreValidated,
    BehaviorChecked,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::DedupChecked => "dedup_checked",
            Self::RateChecked => "rate_checked",
            Self::Authenticated => "authenticated",
            Self::ScoreValidated => "score_validated",
            Self::BehaviorChecked => "behavior_checked",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal rejection: reason, optional retry hint (unix ms) and the
/// stage that produced it. `stage` is the last stage the submission passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub retry_after: Option<i64>,
    pub stage: Stage,
}

impl Rejection {
    #[must_use]
    pub fn new(reason: RejectReason, stage: Stage) -> Self {
        Self {
            reason,
            retry_after: None,
            stage,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: i64) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Failure that prevented the gate from reaching a decision at all.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("infrastructure failure: {0}")]
    Infrastructure(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_codes_are_stable() {
        assert_eq!(RejectReason::Authentication.code(), "authentication");
        assert_eq!(RejectReason::RateLimited.code(), "rate_limited");
        assert_eq!(RejectReason::Duplicate.code(), "duplicate");
        assert_eq!(
            RejectReason::Validation(ValidationFailure::ScoreJump).code(),
            "validation"
        );
        assert_eq!(RejectReason::BehaviorBlock.code(), "behavior_block");
        assert_eq!(RejectReason::Configuration.code(), "configuration");
    }

    #[test]
    fn validation_message_includes_rule() {
        let reason = RejectReason::Validation(ValidationFailure::RatioExceeded);
        assert_eq!(
            reason.to_string(),
            "validation failed: score per transaction exceeds the allowed ratio"
        );
        assert_eq!(ValidationFailure::RatioExceeded.code(), "ratio_exceeded");
    }

    #[test]
    fn behavior_block_message_is_generic() {
        assert_eq!(RejectReason::BehaviorBlock.to_string(), "request blocked");
    }

    #[test]
    fn rejection_carries_retry_hint() {
        let rejection =
            Rejection::new(RejectReason::RateLimited, Stage::DedupChecked).with_retry_after(42);
        assert_eq!(rejection.retry_after, Some(42));
        assert_eq!(rejection.stage.to_string(), "dedup_checked");
    }

    #[test]
    fn infrastructure_error_wraps_anyhow() {
        let err = GateError::from(anyhow::anyhow!("store unavailable"));
        assert_eq!(err.to_string(), "infrastructure failure: store unavailable");
    }
}
