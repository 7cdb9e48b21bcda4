//! Score plausibility checks.
//!
//! [`ScoreValidator`] holds the stateless rules (bounds, ratio, declared state);
//! [`SubmissionHistory`] keeps the last accepted submission per client so the
//! velocity between consecutive submissions can be bounded.

use crate::gate::{config::ValidatorConfig, error::ValidationFailure, session::Session};
use dashmap::{DashMap, mapref::entry::Entry};
use serde_json::Value;
use tracing::debug;

/// Level and score the client claims its game is at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclaredState {
    pub level: Option<i64>,
    pub score: Option<i64>,
}

impl DeclaredState {
    /// Pick `level` and `score` out of a game-state object; other keys are ignored.
    #[must_use]
    pub fn from_game_state(state: &Value) -> Self {
        Self {
            level: integer_field(state, "level"),
            score: integer_field(state, "score"),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.level.is_none() && self.score.is_none()
    }
}

pub(crate) fn integer_field(state: &Value, key: &str) -> Option<i64> {
    let value = state.get(key)?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|number| number.fract() == 0.0 && number.is_finite())
            .map(|number| number as i64)
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreValidator {
    config: ValidatorConfig,
}

impl ScoreValidator {
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> ValidatorConfig {
        self.config
    }

    /// Check one submission against the configured bounds.
    ///
    /// # Errors
    /// Returns the first rule the submission violates.
    pub fn validate(
        &self,
        identity: &str,
        score: i64,
        transaction_count: i64,
        declared: &DeclaredState,
    ) -> Result<(), ValidationFailure> {
        let result = self.check_bounds(score, transaction_count, declared);
        if let Err(failure) = result {
            debug!(identity, score, transaction_count, failure = failure.code(), "score rejected");
        }
        result
    }

    fn check_bounds(
        &self,
        score: i64,
        transaction_count: i64,
        declared: &DeclaredState,
    ) -> Result<(), ValidationFailure> {
        if score < 0 || transaction_count < 0 {
            return Err(ValidationFailure::Negative);
        }
        if score > self.config.max_score_per_request {
            return Err(ValidationFailure::ScoreTooLarge);
        }
        if transaction_count > self.config.max_transactions_per_request {
            return Err(ValidationFailure::TooManyTransactions);
        }

        let transactions = transaction_count.max(1);
        if score > self.config.max_score_per_transaction.saturating_mul(transactions) {
            return Err(ValidationFailure::RatioExceeded);
        }

        if let Some(declared_score) = declared.score
            && declared_score != score
        {
            return Err(ValidationFailure::ScoreMismatch);
        }

        if let Some(level) = declared.level
            && score > level.saturating_mul(self.config.per_level_cap)
        {
            return Err(ValidationFailure::LevelCeiling);
        }

        Ok(())
    }
}

/// Compare the declared state with what the session recorded.
///
/// Returns the state to validate against: the declared fields, with gaps
/// filled from the session.
///
/// # Errors
/// Returns `SessionOwnerMismatch`, `LevelMismatch` or `ScoreMismatch`.
pub fn cross_check_session(
    player: &str,
    declared: &DeclaredState,
    session: &Session,
) -> Result<DeclaredState, ValidationFailure> {
    if !session.player.eq_ignore_ascii_case(player) {
        return Err(ValidationFailure::SessionOwnerMismatch);
    }

    let stored = DeclaredState::from_game_state(&session.game_state);

    if let (Some(declared_level), Some(stored_level)) = (declared.level, stored.level)
        && declared_level != stored_level
    {
        return Err(ValidationFailure::LevelMismatch);
    }
    if let (Some(declared_score), Some(stored_score)) = (declared.score, stored.score)
        && declared_score != stored_score
    {
        return Err(ValidationFailure::ScoreMismatch);
    }

    Ok(DeclaredState {
        level: declared.level.or(stored.level),
        score: declared.score.or(stored.score),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub player: String,
    pub timestamp: i64,
    pub score: i64,
    pub transaction_count: i64,
}

/// Last submission per client key.
#[derive(Debug)]
pub struct SubmissionHistory {
    records: DashMap<String, SubmissionRecord>,
    config: ValidatorConfig,
}

impl SubmissionHistory {
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    /// Bound the velocity relative to the previous submission and, if it
    /// passes, make `record` the new reference point.
    ///
    /// # Errors
    /// Returns `RapidSubmission` or `ScoreJump`; the stored record is left untouched.
    pub fn check_and_record(
        &self,
        client_key: &str,
        record: SubmissionRecord,
    ) -> Result<(), ValidationFailure> {
        match self.records.entry(client_key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
            Entry::Occupied(mut occupied) => {
                self.check_velocity(occupied.get(), &record)?;
                occupied.insert(record);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn last(&self, client_key: &str) -> Option<SubmissionRecord> {
        self.records.get(client_key).map(|record| record.clone())
    }

    pub fn sweep(&self, now: i64) -> usize {
        let before = self.records.len();
        let ttl = self.config.history_ttl_ms;
        self.records
            .retain(|_, record| now - record.timestamp < ttl);
        before.saturating_sub(self.records.len())
    }

    fn check_velocity(
        &self,
        previous: &SubmissionRecord,
        current: &SubmissionRecord,
    ) -> Result<(), ValidationFailure> {
        let elapsed_ms = current.timestamp - previous.timestamp;
        if elapsed_ms < self.config.min_submission_interval_ms {
            return Err(ValidationFailure::RapidSubmission);
        }

        if elapsed_ms > 0 && elapsed_ms < self.config.velocity_window_ms {
            let gained = (current.score - previous.score) as f64;
            let per_second = gained / (elapsed_ms as f64 / 1000.0);
            if per_second > self.config.max_score_per_second as f64 {
                return Err(ValidationFailure::ScoreJump);
            }
        }

        Ok(())
    }
}
