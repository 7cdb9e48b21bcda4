//! The admission pipeline.
//!
//! ```text
//! Received -> DedupChecked -> RateChecked -> Authenticated -> ScoreValidated
//!          -> BehaviorChecked -> Admitted
//! ```
//!
//! Any stage may short-circuit to `Rejected`. Stages share state: validation
//! failures and duplicates feed the behavior tracker, and a rejection after
//! the dedup stage releases the pending entry so the client can retry.

use crate::gate::{
    behavior::{AgentVerdict, BehaviorTracker, Signal, classify_user_agent, client_key},
    clock::Clock,
    config::GateConfig,
    content_hash::ContentHashCheck,
    dedup::{DedupOutcome, RequestDeduplicator, request_id},
    error::{GateError, RejectReason, Rejection, Stage, ValidationFailure},
    rate_limit::{RateLimiter, ScoreRateLimiter},
    session::{Session, SessionStore},
    token::TokenAuthenticator,
    validator::{
        DeclaredState, ScoreValidator, SubmissionHistory, SubmissionRecord, cross_check_session,
    },
};
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// An untrusted score submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub player: String,
    pub score: i64,
    pub transaction_count: i64,
    pub session_token: String,
    pub session_id: Option<String>,
    pub game_state: Option<Value>,
    pub content_hash: Option<String>,
}

/// What the transport layer knows about the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Pass back to [`AdmissionPipeline::complete`] once the commit succeeded.
    pub request_id: String,
    pub client_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted(Admission),
    Rejected(Rejection),
}

impl Decision {
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Counts of entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_windows: usize,
    pub pending_requests: usize,
    pub submission_records: usize,
    pub client_profiles: usize,
    pub sessions: usize,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.rate_windows
            + self.pending_requests
            + self.submission_records
            + self.client_profiles
            + self.sessions
    }
}

pub struct AdmissionPipeline {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    tokens: TokenAuthenticator,
    limiter: RateLimiter,
    score_limiter: ScoreRateLimiter,
    dedup: RequestDeduplicator,
    validator: ScoreValidator,
    history: SubmissionHistory,
    content_hash: ContentHashCheck,
    behavior: BehaviorTracker,
    sessions: Arc<dyn SessionStore>,
}

impl AdmissionPipeline {
    #[must_use]
    pub fn new(
        config: GateConfig,
        secret: Option<SecretString>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens: TokenAuthenticator::new(secret, config.token().clone(), clock.clone()),
            limiter: RateLimiter::new(config.rate_limit()),
            score_limiter: ScoreRateLimiter::new(config.score_rate_limit()),
            dedup: RequestDeduplicator::new(config.dedup()),
            validator: ScoreValidator::new(config.validator()),
            history: SubmissionHistory::new(config.validator()),
            content_hash: ContentHashCheck::new(
                config.content_hash(),
                config.validator().per_level_cap,
            ),
            behavior: BehaviorTracker::new(config.behavior()),
            sessions,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenAuthenticator {
        &self.tokens
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    #[must_use]
    pub fn behavior(&self) -> &BehaviorTracker {
        &self.behavior
    }

    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Run `submission` through every stage and decide.
    ///
    /// # Errors
    /// Returns `GateError::Infrastructure` when a dependency (the session
    /// store) fails; such a failure never admits.
    #[instrument(skip(self, submission, context), fields(player = %submission.player, score = submission.score))]
    pub async fn admit(
        &self,
        submission: &Submission,
        context: &RequestContext,
    ) -> Result<Decision, GateError> {
        let now = self.clock.now_ms();
        let client = client_key(&submission.player, context.client_ip.as_deref());
        self.behavior.observe(&client, now);

        // Received -> DedupChecked
        let id = request_id(
            &submission.player,
            submission.score,
            submission.transaction_count,
        );
        if let DedupOutcome::Duplicate { retry_at } = self.dedup.check(&id, now) {
            self.behavior.record(&client, Signal::DuplicateRequest, now);
            return Ok(self.reject(
                &client,
                Rejection::new(RejectReason::Duplicate, Stage::Received).with_retry_after(retry_at),
            ));
        }

        match self.evaluate(submission, context, &client, now).await {
            Ok(None) => {
                info!(request_id = %id, client_key = %client, "submission admitted");
                Ok(Decision::Admitted(Admission {
                    request_id: id,
                    client_key: client,
                }))
            }
            Ok(Some(rejection)) => {
                self.dedup.release(&id);
                Ok(self.reject(&client, rejection))
            }
            Err(err) => {
                self.dedup.release(&id);
                warn!(error = %err, "admission aborted");
                Err(err)
            }
        }
    }

    /// Everything after the dedup stage. `Ok(None)` means admitted.
    async fn evaluate(
        &self,
        submission: &Submission,
        context: &RequestContext,
        client: &str,
        now: i64,
    ) -> Result<Option<Rejection>, GateError> {
        // DedupChecked -> RateChecked
        let rate_key = context
            .client_ip
            .as_deref()
            .filter(|ip| !ip.trim().is_empty())
            .unwrap_or(submission.player.as_str());
        let generic = self.limiter.check(rate_key, now);
        if !generic.allowed {
            return Ok(Some(
                Rejection::new(RejectReason::RateLimited, Stage::DedupChecked)
                    .with_retry_after(generic.reset_at),
            ));
        }
        let scored = self
            .score_limiter
            .check(&submission.player, submission.score, now);
        if !scored.allowed {
            return Ok(Some(
                Rejection::new(RejectReason::RateLimited, Stage::DedupChecked)
                    .with_retry_after(scored.reset_at),
            ));
        }

        // RateChecked -> Authenticated
        if !self.tokens.is_configured() {
            warn!("no token secret configured, refusing submissions");
            return Ok(Some(Rejection::new(
                RejectReason::Configuration,
                Stage::RateChecked,
            )));
        }

        let session = match submission.session_id.as_deref() {
            Some(session_id) => self.sessions.get(session_id, now).await?,
            None => None,
        };
        let snapshot = token_snapshot(submission, session.as_ref());
        if !self.tokens.verify_for_channel(
            &submission.session_token,
            &submission.player,
            &snapshot,
            self.config.token().window_ms,
            context.client_ip.as_deref(),
        ) {
            return Ok(Some(Rejection::new(
                RejectReason::Authentication,
                Stage::RateChecked,
            )));
        }

        // Authenticated -> ScoreValidated
        if let Err(failure) = self.validate(submission, session.as_ref(), client, now) {
            return Ok(Some(Rejection::new(
                RejectReason::Validation(failure),
                Stage::Authenticated,
            )));
        }

        // ScoreValidated -> BehaviorChecked
        match classify_user_agent(context.user_agent.as_deref()) {
            AgentVerdict::Automated => {
                self.behavior.record(client, Signal::AutomatedClient, now);
                return Ok(Some(Rejection::new(
                    RejectReason::BehaviorBlock,
                    Stage::ScoreValidated,
                )));
            }
            AgentVerdict::Unrecognized if self.behavior.config().flag_missing_browser_headers => {
                self.behavior
                    .record(client, Signal::MissingBrowserHeaders, now);
            }
            _ => {}
        }
        if self.behavior.should_block(client) {
            return Ok(Some(Rejection::new(
                RejectReason::BehaviorBlock,
                Stage::ScoreValidated,
            )));
        }

        Ok(None)
    }

    fn validate(
        &self,
        submission: &Submission,
        session: Option<&Session>,
        client: &str,
        now: i64,
    ) -> Result<(), ValidationFailure> {
        let mut declared = submission
            .game_state
            .as_ref()
            .map(DeclaredState::from_game_state)
            .unwrap_or_default();

        if submission.session_id.is_some() {
            let session = session.ok_or(ValidationFailure::UnknownSession)?;
            declared = cross_check_session(&submission.player, &declared, session)
                .map_err(|failure| self.flag(client, failure, now))?;
        }

        self.validator
            .validate(
                &submission.player,
                submission.score,
                submission.transaction_count,
                &declared,
            )
            .map_err(|failure| self.flag(client, failure, now))?;

        match submission
            .content_hash
            .as_deref()
            .filter(|hash| !hash.trim().is_empty())
        {
            Some(hash) => {
                let report =
                    self.content_hash
                        .inspect(hash, submission.score, declared.level, now);
                // The report carries its own signals; failures here are not flagged again.
                for signal in report.signals {
                    self.behavior.record(client, signal, now);
                }
                if let Some(failure) = report.failure {
                    return Err(failure);
                }
            }
            None if self.content_hash.is_required() => {
                return Err(ValidationFailure::MissingContentHash);
            }
            None => {}
        }

        self.history
            .check_and_record(
                client,
                SubmissionRecord {
                    player: submission.player.clone(),
                    timestamp: now,
                    score: submission.score,
                    transaction_count: submission.transaction_count,
                },
            )
            .map_err(|failure| self.flag(client, failure, now))
    }

    /// Record the suspicion signal a failure implies, if any.
    fn flag(&self, client: &str, failure: ValidationFailure, now: i64) -> ValidationFailure {
        if let Some(signal) = Signal::for_failure(failure) {
            self.behavior.record(client, signal, now);
        }
        failure
    }

    fn reject(&self, client: &str, rejection: Rejection) -> Decision {
        warn!(
            client_key = client,
            stage = %rejection.stage,
            reason = rejection.reason.code(),
            retry_after = rejection.retry_after,
            "submission rejected"
        );
        Decision::Rejected(rejection)
    }

    /// Called once the downstream commit for an admitted request succeeded.
    pub fn complete(&self, request_id: &str) {
        self.dedup.mark_complete(request_id, self.clock.now_ms());
    }

    /// Garbage-collect every keyed store and the session store.
    ///
    /// # Errors
    /// Returns an error if the session store sweep fails; the in-memory
    /// stores have been swept by then.
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let now = self.clock.now_ms();
        let mut report = SweepReport {
            rate_windows: self.limiter.sweep(now) + self.score_limiter.sweep(now),
            pending_requests: self.dedup.sweep(now),
            submission_records: self.history.sweep(now),
            client_profiles: self.behavior.sweep(now),
            sessions: 0,
        };
        report.sessions = self.sessions.sweep(now).await?;
        debug!(removed = report.total(), "sweep finished");
        Ok(report)
    }
}

/// The game state a session token is bound to: what the client sent, else
/// what the session recorded, else an empty object.
#[must_use]
pub fn token_snapshot(submission: &Submission, session: Option<&Session>) -> Value {
    submission
        .game_state
        .clone()
        .or_else(|| session.map(|session| session.game_state.clone()))
        .unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{
        clock::ManualClock,
        config::{BehaviorConfig, ContentHashConfig},
        session::MemorySessionStore,
    };
    use anyhow::anyhow;
    use serde_json::json;

    const PLAYER: &str = "0x1111111111111111111111111111111111111111";
    const NOW: i64 = 1_700_000_000_000;
    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/120.0";

    struct Harness {
        clock: Arc<ManualClock>,
        pipeline: AdmissionPipeline,
    }

    fn harness_with(config: GateConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(NOW));
        let pipeline = AdmissionPipeline::new(
            config,
            Some(SecretString::from("pipeline-secret")),
            Arc::new(MemorySessionStore::default()),
            clock.clone(),
        );
        Harness { clock, pipeline }
    }

    fn harness() -> Harness {
        harness_with(GateConfig::new())
    }

    fn context() -> RequestContext {
        RequestContext {
            client_ip: Some("198.51.100.7".to_string()),
            user_agent: Some(BROWSER.to_string()),
        }
    }

    fn submission(pipeline: &AdmissionPipeline, score: i64) -> Submission {
        let state = json!({"score": score, "level": 1});
        let session_token = pipeline.tokens().issue_now(PLAYER, &state, "").unwrap();
        Submission {
            player: PLAYER.to_string(),
            score,
            transaction_count: 1,
            session_token,
            session_id: None,
            game_state: Some(state),
            content_hash: None,
        }
    }

    fn rejection(decision: Decision) -> Rejection {
        match decision {
            Decision::Rejected(rejection) => rejection,
            Decision::Admitted(admission) => panic!("unexpected admission: {admission:?}"),
        }
    }

    #[tokio::test]
    async fn admits_plausible_submission() {
        let h = harness();
        let sub = submission(&h.pipeline, 100);
        let decision = h.pipeline.admit(&sub, &context()).await.unwrap();
        match decision {
            Decision::Admitted(admission) => {
                assert_eq!(admission.request_id, request_id(PLAYER, 100, 1));
                assert_eq!(admission.client_key, format!("{PLAYER}-198.51.100.7"));
            }
            Decision::Rejected(rejection) => panic!("unexpected rejection: {rejection:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_in_flight_is_rejected_and_flagged() {
        let h = harness();
        let sub = submission(&h.pipeline, 100);
        assert!(h.pipeline.admit(&sub, &context()).await.unwrap().is_admitted());

        let second = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(second.reason, RejectReason::Duplicate);
        assert_eq!(second.stage, Stage::Received);
        assert_eq!(second.retry_after, Some(NOW + 30_000));

        let key = client_key(PLAYER, Some("198.51.100.7"));
        assert_eq!(
            h.pipeline.behavior().signals(&key),
            vec![Signal::DuplicateRequest]
        );
    }

    #[tokio::test]
    async fn score_rate_limit_applies_per_player() {
        let h = harness();
        let first = submission(&h.pipeline, 100);
        assert!(h.pipeline.admit(&first, &context()).await.unwrap().is_admitted());
        h.pipeline.complete(&request_id(PLAYER, 100, 1));

        h.clock.advance(10_000);
        let second = submission(&h.pipeline, 200);
        let rejected = rejection(h.pipeline.admit(&second, &context()).await.unwrap());
        assert_eq!(rejected.reason, RejectReason::RateLimited);
        assert_eq!(rejected.stage, Stage::DedupChecked);
        assert_eq!(rejected.retry_after, Some(NOW + 60_000));
    }

    #[tokio::test]
    async fn bad_token_is_rejected_and_releases_dedup_entry() {
        let h = harness();
        let mut sub = submission(&h.pipeline, 100);
        sub.session_token = "00".repeat(32);

        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(rejected.reason, RejectReason::Authentication);
        assert_eq!(rejected.stage, Stage::RateChecked);

        // Same id again: not a duplicate, the score window is what stops it.
        let again = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(again.reason, RejectReason::RateLimited);
    }

    #[tokio::test]
    async fn missing_secret_is_a_configuration_rejection() {
        let clock = Arc::new(ManualClock::new(NOW));
        let pipeline = AdmissionPipeline::new(
            GateConfig::new(),
            None,
            Arc::new(MemorySessionStore::default()),
            clock,
        );
        let sub = Submission {
            player: PLAYER.to_string(),
            score: 10,
            transaction_count: 1,
            session_token: "00".repeat(32),
            session_id: None,
            game_state: None,
            content_hash: None,
        };
        let rejected = rejection(pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(rejected.reason, RejectReason::Configuration);
    }

    #[tokio::test]
    async fn validation_failure_reports_rule() {
        let h = harness();
        let sub = submission(&h.pipeline, 600);
        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(
            rejected.reason,
            RejectReason::Validation(ValidationFailure::RatioExceeded)
        );
        assert_eq!(rejected.stage, Stage::Authenticated);
    }

    #[tokio::test]
    async fn automated_client_is_blocked() {
        let h = harness();
        let sub = submission(&h.pipeline, 100);
        let ctx = RequestContext {
            client_ip: Some("198.51.100.7".to_string()),
            user_agent: Some("curl/8.4.0".to_string()),
        };
        let rejected = rejection(h.pipeline.admit(&sub, &ctx).await.unwrap());
        assert_eq!(rejected.reason, RejectReason::BehaviorBlock);
        assert_eq!(rejected.stage, Stage::ScoreValidated);
    }

    #[tokio::test]
    async fn accumulated_signals_block_the_client() {
        let h = harness_with(GateConfig::new().with_behavior(BehaviorConfig {
            block_threshold: 1,
            ..BehaviorConfig::default()
        }));
        let key = client_key(PLAYER, Some("198.51.100.7"));
        h.pipeline.behavior().record(&key, Signal::HashTamper, NOW);
        h.pipeline.behavior().record(&key, Signal::HashTamper, NOW);

        let sub = submission(&h.pipeline, 100);
        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(rejected.reason, RejectReason::BehaviorBlock);
    }

    #[tokio::test]
    async fn session_state_is_cross_checked() {
        let h = harness();
        let session = h
            .pipeline
            .sessions()
            .create(PLAYER, Value::Null, NOW)
            .await
            .unwrap();
        h.pipeline
            .sessions()
            .merge_game_state(&session.session_id, json!({"score": 100, "level": 2}), NOW)
            .await
            .unwrap();

        let mut sub = submission(&h.pipeline, 100);
        sub.session_id = Some(session.session_id.clone());
        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(
            rejected.reason,
            RejectReason::Validation(ValidationFailure::LevelMismatch)
        );

        let key = client_key(PLAYER, Some("198.51.100.7"));
        assert_eq!(h.pipeline.behavior().signals(&key), vec![Signal::LevelMismatch]);
    }

    #[tokio::test]
    async fn session_state_backs_token_when_client_sends_none() {
        let h = harness();
        let session = h
            .pipeline
            .sessions()
            .create(PLAYER, Value::Null, NOW)
            .await
            .unwrap();
        let stored = h
            .pipeline
            .sessions()
            .merge_game_state(&session.session_id, json!({"score": 100, "level": 1}), NOW)
            .await
            .unwrap()
            .unwrap();

        let token = h
            .pipeline
            .tokens()
            .issue_now(PLAYER, &stored.game_state, "")
            .unwrap();
        let sub = Submission {
            player: PLAYER.to_string(),
            score: 100,
            transaction_count: 1,
            session_token: token,
            session_id: Some(session.session_id),
            game_state: None,
            content_hash: None,
        };
        assert!(h.pipeline.admit(&sub, &context()).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn required_content_hash() {
        let h = harness_with(GateConfig::new().with_content_hash(ContentHashConfig {
            required: true,
            ..ContentHashConfig::default()
        }));
        let sub = submission(&h.pipeline, 100);
        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(
            rejected.reason,
            RejectReason::Validation(ValidationFailure::MissingContentHash)
        );
    }

    #[tokio::test]
    async fn content_hash_failure_is_flagged_once() {
        use base64ct::{Base64, Encoding};

        let h = harness();
        let mut sub = submission(&h.pipeline, 100);
        let snapshot = json!({
            "timestamp": NOW - 1_000,
            "player": {"x": 5_000, "y": 10},
            "score": 100,
            "level": 1
        });
        sub.content_hash = Some(Base64::encode_string(snapshot.to_string().as_bytes()));

        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(
            rejected.reason,
            RejectReason::Validation(ValidationFailure::PositionOutOfBounds)
        );
        let key = client_key(PLAYER, Some("198.51.100.7"));
        assert_eq!(
            h.pipeline.behavior().signals(&key),
            vec![Signal::PositionOutOfBounds]
        );
    }

    #[tokio::test]
    async fn content_hash_without_timestamp_is_rejected() {
        use base64ct::{Base64, Encoding};

        let h = harness();
        let mut sub = submission(&h.pipeline, 100);
        sub.content_hash = Some(Base64::encode_string(br#"{"score":100}"#));

        let rejected = rejection(h.pipeline.admit(&sub, &context()).await.unwrap());
        assert_eq!(
            rejected.reason,
            RejectReason::Validation(ValidationFailure::InvalidContentHash)
        );
        assert_eq!(rejected.stage, Stage::Authenticated);
    }

    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn create<'a>(
            &'a self,
            _player: &'a str,
            _opaque_keys: Value,
            _now: i64,
        ) -> crate::gate::session::StoreFuture<'a, Session> {
            Box::pin(async { Err(anyhow!("store down")) })
        }

        fn get<'a>(
            &'a self,
            _session_id: &'a str,
            _now: i64,
        ) -> crate::gate::session::StoreFuture<'a, Option<Session>> {
            Box::pin(async { Err(anyhow!("store down")) })
        }

        fn merge_game_state<'a>(
            &'a self,
            _session_id: &'a str,
            _patch: Value,
            _now: i64,
        ) -> crate::gate::session::StoreFuture<'a, Option<Session>> {
            Box::pin(async { Err(anyhow!("store down")) })
        }

        fn delete<'a>(&'a self, _session_id: &'a str) -> crate::gate::session::StoreFuture<'a, bool> {
            Box::pin(async { Err(anyhow!("store down")) })
        }

        fn sweep(&self, _now: i64) -> crate::gate::session::StoreFuture<'_, usize> {
            Box::pin(async { Err(anyhow!("store down")) })
        }

        fn ping(&self) -> crate::gate::session::StoreFuture<'_, ()> {
            Box::pin(async { Err(anyhow!("store down")) })
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let clock = Arc::new(ManualClock::new(NOW));
        let pipeline = AdmissionPipeline::new(
            GateConfig::new(),
            Some(SecretString::from("pipeline-secret")),
            Arc::new(BrokenStore),
            clock,
        );
        let mut sub = submission(&pipeline, 100);
        sub.session_id = Some("abc".to_string());

        let result = pipeline.admit(&sub, &context()).await;
        assert!(matches!(result, Err(GateError::Infrastructure(_))));
        assert!(pipeline.sweep().await.is_err());
    }

    #[tokio::test]
    async fn sweep_clears_expired_state() {
        let h = harness();
        let sub = submission(&h.pipeline, 100);
        assert!(h.pipeline.admit(&sub, &context()).await.unwrap().is_admitted());

        h.clock.advance(2 * 60 * 60 * 1000);
        let report = h.pipeline.sweep().await.unwrap();
        assert_eq!(report.pending_requests, 1);
        assert_eq!(report.client_profiles, 1);
        assert_eq!(report.submission_records, 1);
        assert_eq!(report.rate_windows, 2);
    }
}
