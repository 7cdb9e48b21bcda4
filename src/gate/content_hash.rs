//! Game-state snapshot sent alongside a submission.
//!
//! The client encodes `{timestamp, player: {x, y}, score, level?}` as base64
//! JSON. It is not signed; it only catches clients that forge a score without
//! also forging a coherent snapshot. A snapshot that cannot be decoded is
//! reported as a soft signal rather than a rejection; one that decodes but
//! lacks a required field is rejected.

use crate::gate::{
    behavior::Signal, config::ContentHashConfig, error::ValidationFailure,
    validator::integer_field,
};
use base64ct::{Base64, Base64Unpadded, Encoding};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    timestamp: i64,
    x: f64,
    y: f64,
    score: i64,
    level: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeError {
    /// Not base64, or not JSON.
    Garbled,
    /// Valid JSON without the required fields.
    Incomplete,
}

impl Snapshot {
    fn decode(encoded: &str) -> Result<Self, DecodeError> {
        let encoded = encoded.trim();
        let bytes = Base64::decode_vec(encoded)
            .or_else(|_| Base64Unpadded::decode_vec(encoded))
            .map_err(|_| DecodeError::Garbled)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|_| DecodeError::Garbled)?;
        Self::from_value(&value).ok_or(DecodeError::Incomplete)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let player = value.get("player")?;
        Some(Self {
            timestamp: integer_field(value, "timestamp")?,
            x: player.get("x")?.as_f64()?,
            y: player.get("y")?.as_f64()?,
            score: integer_field(value, "score")?,
            level: integer_field(value, "level"),
        })
    }
}

/// What a snapshot inspection found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentHashReport {
    pub failure: Option<ValidationFailure>,
    pub signals: Vec<Signal>,
}

impl ContentHashReport {
    fn reject(failure: ValidationFailure, signal: Option<Signal>) -> Self {
        Self {
            failure: Some(failure),
            signals: signal.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContentHashCheck {
    config: ContentHashConfig,
    per_level_cap: i64,
}

impl ContentHashCheck {
    #[must_use]
    pub fn new(config: ContentHashConfig, per_level_cap: i64) -> Self {
        Self {
            config,
            per_level_cap,
        }
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.config.required
    }

    /// Compare the snapshot against the submitted score and declared level.
    #[must_use]
    pub fn inspect(
        &self,
        encoded: &str,
        submitted_score: i64,
        declared_level: Option<i64>,
        now: i64,
    ) -> ContentHashReport {
        let snapshot = match Snapshot::decode(encoded) {
            Ok(snapshot) => snapshot,
            Err(DecodeError::Garbled) => {
                debug!("content hash could not be decoded");
                return ContentHashReport {
                    failure: None,
                    signals: vec![Signal::HashTamper],
                };
            }
            Err(DecodeError::Incomplete) => {
                debug!("content hash is missing required fields");
                return ContentHashReport::reject(
                    ValidationFailure::InvalidContentHash,
                    Some(Signal::HashTamper),
                );
            }
        };

        let age = now - snapshot.timestamp;
        if age < 0 || age > self.config.max_age_ms {
            return ContentHashReport::reject(ValidationFailure::StaleContentHash, None);
        }

        if snapshot.score != submitted_score {
            return ContentHashReport::reject(ValidationFailure::ScoreMismatch, None);
        }

        if !(0.0..=self.config.field_width).contains(&snapshot.x)
            || !(0.0..=self.config.field_height).contains(&snapshot.y)
        {
            return ContentHashReport::reject(
                ValidationFailure::PositionOutOfBounds,
                Some(Signal::PositionOutOfBounds),
            );
        }

        if let (Some(snapshot_level), Some(declared)) = (snapshot.level, declared_level)
            && snapshot_level != declared
        {
            return ContentHashReport::reject(
                ValidationFailure::LevelMismatch,
                Some(Signal::LevelMismatch),
            );
        }

        if let Some(level) = snapshot.level.or(declared_level)
            && submitted_score > level.saturating_mul(self.per_level_cap)
        {
            return ContentHashReport::reject(
                ValidationFailure::LevelCeiling,
                Some(Signal::ScoreJump),
            );
        }

        ContentHashReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn encode(value: &Value) -> String {
        Base64::encode_string(value.to_string().as_bytes())
    }

    fn check() -> ContentHashCheck {
        ContentHashCheck::new(ContentHashConfig::default(), 1000)
    }

    #[test]
    fn coherent_snapshot_passes() {
        let hash = encode(&json!({
            "timestamp": NOW - 1_000,
            "player": {"x": 400, "y": 300.5},
            "score": 120,
            "level": 1
        }));
        assert_eq!(
            check().inspect(&hash, 120, Some(1), NOW),
            ContentHashReport::default()
        );
    }

    #[test]
    fn undecodable_snapshot_is_only_a_signal() {
        let report = check().inspect("%%%not-base64%%%", 120, None, NOW);
        assert_eq!(report.failure, None);
        assert_eq!(report.signals, vec![Signal::HashTamper]);

        let not_json = Base64::encode_string(b"score=120");
        let report = check().inspect(&not_json, 120, None, NOW);
        assert_eq!(report.failure, None);
        assert_eq!(report.signals, vec![Signal::HashTamper]);
    }

    #[test]
    fn incomplete_snapshot_is_rejected() {
        let incomplete = [
            json!({"score": 120}),
            json!({"player": {"x": 1, "y": 1}, "score": 120}),
            json!({"timestamp": NOW, "score": 120}),
            json!({"timestamp": NOW, "player": {"x": 1}, "score": 120}),
            json!({"timestamp": NOW, "player": {"x": 1, "y": 1}}),
        ];
        for value in incomplete {
            let report = check().inspect(&encode(&value), 120, None, NOW);
            assert_eq!(report.failure, Some(ValidationFailure::InvalidContentHash));
            assert_eq!(report.signals, vec![Signal::HashTamper]);
        }
    }

    #[test]
    fn stale_or_future_snapshot_is_rejected() {
        let stale = encode(&json!({"timestamp": NOW - 300_001, "player": {"x": 1, "y": 1}, "score": 1}));
        assert_eq!(
            check().inspect(&stale, 1, None, NOW).failure,
            Some(ValidationFailure::StaleContentHash)
        );

        let future = encode(&json!({"timestamp": NOW + 1, "player": {"x": 1, "y": 1}, "score": 1}));
        assert_eq!(
            check().inspect(&future, 1, None, NOW).failure,
            Some(ValidationFailure::StaleContentHash)
        );
    }

    #[test]
    fn score_and_position_are_checked() {
        let hash = encode(&json!({"timestamp": NOW, "player": {"x": 1, "y": 1}, "score": 5}));
        assert_eq!(
            check().inspect(&hash, 6, None, NOW).failure,
            Some(ValidationFailure::ScoreMismatch)
        );

        let outside = encode(&json!({"timestamp": NOW, "player": {"x": 801, "y": 1}, "score": 5}));
        let report = check().inspect(&outside, 5, None, NOW);
        assert_eq!(report.failure, Some(ValidationFailure::PositionOutOfBounds));
        assert_eq!(report.signals, vec![Signal::PositionOutOfBounds]);
    }

    #[test]
    fn level_is_checked_against_declared_state() {
        let hash = encode(&json!({"timestamp": NOW, "player": {"x": 1, "y": 1}, "score": 900, "level": 2}));
        let report = check().inspect(&hash, 900, Some(3), NOW);
        assert_eq!(report.failure, Some(ValidationFailure::LevelMismatch));
        assert_eq!(report.signals, vec![Signal::LevelMismatch]);

        let tight = ContentHashCheck::new(ContentHashConfig::default(), 100);
        let report = tight.inspect(&hash, 900, Some(2), NOW);
        assert_eq!(report.failure, Some(ValidationFailure::LevelCeiling));
        assert_eq!(report.signals, vec![Signal::ScoreJump]);
    }
}
