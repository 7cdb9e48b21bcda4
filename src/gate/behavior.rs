//! Per-client suspicion tracking.
//!
//! Each client key (`<player>-<ip>`) accumulates signals from every stage of
//! the pipeline. Signals are never cleared while the profile is alive; the
//! sweeper drops idle profiles.

use crate::gate::{config::BehaviorConfig, error::ValidationFailure};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use tracing::warn;

const AUTOMATED_AGENTS: [&str; 4] = ["curl", "wget", "Postman", "python-requests"];
const BROWSER_MARKERS: [&str; 5] = ["Mozilla", "Chrome", "Firefox", "Safari", "WebKit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    RapidRequests,
    RapidSubmission,
    PositionOutOfBounds,
    LevelMismatch,
    ScoreJump,
    HashTamper,
    AutomatedClient,
    MissingBrowserHeaders,
    DuplicateRequest,
}

impl Signal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RapidRequests => "rapid_requests",
            Self::RapidSubmission => "rapid_submission",
            Self::PositionOutOfBounds => "position_out_of_bounds",
            Self::LevelMismatch => "level_mismatch",
            Self::ScoreJump => "score_jump",
            Self::HashTamper => "hash_tamper",
            Self::AutomatedClient => "automated_client",
            Self::MissingBrowserHeaders => "missing_browser_headers",
            Self::DuplicateRequest => "duplicate_request",
        }
    }

    /// Signal implied by a validation failure, if any.
    #[must_use]
    pub fn for_failure(failure: ValidationFailure) -> Option<Self> {
        match failure {
            ValidationFailure::RapidSubmission => Some(Self::RapidSubmission),
            ValidationFailure::ScoreJump => Some(Self::ScoreJump),
            ValidationFailure::LevelMismatch => Some(Self::LevelMismatch),
            ValidationFailure::PositionOutOfBounds => Some(Self::PositionOutOfBounds),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the user-agent heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentVerdict {
    Browser,
    /// Not obviously a browser; worth a soft signal.
    Unrecognized,
    /// A scripting tool; always blocked.
    Automated,
}

#[must_use]
pub fn classify_user_agent(user_agent: Option<&str>) -> AgentVerdict {
    let agent = user_agent.map(str::trim).unwrap_or_default();
    if AUTOMATED_AGENTS.iter().any(|tool| agent.contains(tool)) {
        AgentVerdict::Automated
    } else if agent.is_empty() || BROWSER_MARKERS.iter().any(|marker| agent.contains(marker)) {
        AgentVerdict::Browser
    } else {
        AgentVerdict::Unrecognized
    }
}

/// `<player>-<ip>`, with `unknown` when the address could not be determined.
#[must_use]
pub fn client_key(player: &str, client_ip: Option<&str>) -> String {
    let ip = client_ip
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown");
    format!("{player}-{ip}")
}

#[derive(Debug, Clone)]
struct Profile {
    request_count: u64,
    last_request_at: i64,
    signals: Vec<Signal>,
}

impl Profile {
    fn new(now: i64) -> Self {
        Self {
            request_count: 0,
            last_request_at: now,
            signals: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct BehaviorTracker {
    profiles: DashMap<String, Profile>,
    config: BehaviorConfig,
}

impl BehaviorTracker {
    #[must_use]
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            profiles: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> BehaviorConfig {
        self.config
    }

    /// Count a request and flag bursts. Returns the client's signal count.
    pub fn observe(&self, client_key: &str, now: i64) -> usize {
        let mut profile = self
            .profiles
            .entry(client_key.to_string())
            .or_insert_with(|| Profile::new(now));

        profile.request_count += 1;
        let since_last = now - profile.last_request_at;
        profile.last_request_at = now;

        if since_last < self.config.rapid_interval_ms
            && profile.request_count > self.config.rapid_min_requests
        {
            warn!(client_key, signal = %Signal::RapidRequests, "suspicious activity");
            profile.signals.push(Signal::RapidRequests);
        }

        profile.signals.len()
    }

    /// Append a signal. Returns the client's signal count.
    pub fn record(&self, client_key: &str, signal: Signal, now: i64) -> usize {
        let mut profile = self
            .profiles
            .entry(client_key.to_string())
            .or_insert_with(|| Profile::new(now));
        warn!(client_key, signal = %signal, "suspicious activity");
        profile.signals.push(signal);
        profile.signals.len()
    }

    #[must_use]
    pub fn should_block(&self, client_key: &str) -> bool {
        self.signal_count(client_key) > self.config.block_threshold
    }

    #[must_use]
    pub fn signal_count(&self, client_key: &str) -> usize {
        self.profiles
            .get(client_key)
            .map_or(0, |profile| profile.signals.len())
    }

    #[must_use]
    pub fn signals(&self, client_key: &str) -> Vec<Signal> {
        self.profiles
            .get(client_key)
            .map(|profile| profile.signals.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn request_count(&self, client_key: &str) -> u64 {
        self.profiles
            .get(client_key)
            .map_or(0, |profile| profile.request_count)
    }

    /// Drop profiles idle for longer than the profile TTL.
    pub fn sweep(&self, now: i64) -> usize {
        let before = self.profiles.len();
        let ttl = self.config.profile_ttl_ms;
        self.profiles
            .retain(|_, profile| now - profile.last_request_at < ttl);
        before.saturating_sub(self.profiles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> BehaviorTracker {
        BehaviorTracker::new(BehaviorConfig::default())
    }

    #[test]
    fn client_key_falls_back_to_unknown() {
        assert_eq!(client_key("0xabc", Some("10.0.0.1")), "0xabc-10.0.0.1");
        assert_eq!(client_key("0xabc", None), "0xabc-unknown");
        assert_eq!(client_key("0xabc", Some(" ")), "0xabc-unknown");
    }

    #[test]
    fn rapid_requests_need_history() {
        let tracker = tracker();
        for i in 0..5 {
            assert_eq!(tracker.observe("c", i * 10), 0);
        }
        // Sixth request inside one second of the previous one.
        assert_eq!(tracker.observe("c", 60), 1);
        assert_eq!(tracker.signals("c"), vec![Signal::RapidRequests]);
        // Slow requests do not add signals.
        assert_eq!(tracker.observe("c", 5_000), 1);
        assert_eq!(tracker.request_count("c"), 7);
    }

    #[test]
    fn block_only_above_threshold() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record("c", Signal::HashTamper, 0);
        }
        assert!(!tracker.should_block("c"));
        assert_eq!(tracker.record("c", Signal::DuplicateRequest, 0), 4);
        assert!(tracker.should_block("c"));
        assert!(!tracker.should_block("other"));
    }

    #[test]
    fn repeated_signals_count_each_time() {
        let tracker = tracker();
        tracker.record("c", Signal::ScoreJump, 0);
        tracker.record("c", Signal::ScoreJump, 0);
        assert_eq!(tracker.signal_count("c"), 2);
    }

    #[test]
    fn user_agent_classification() {
        assert_eq!(classify_user_agent(Some("curl/8.4.0")), AgentVerdict::Automated);
        assert_eq!(
            classify_user_agent(Some("PostmanRuntime/7.36")),
            AgentVerdict::Automated
        );
        assert_eq!(
            classify_user_agent(Some("python-requests/2.31")),
            AgentVerdict::Automated
        );
        assert_eq!(
            classify_user_agent(Some(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0"
            )),
            AgentVerdict::Browser
        );
        assert_eq!(classify_user_agent(None), AgentVerdict::Browser);
        assert_eq!(
            classify_user_agent(Some("GameBot/1.0")),
            AgentVerdict::Unrecognized
        );
    }

    #[test]
    fn failure_signals() {
        assert_eq!(
            Signal::for_failure(ValidationFailure::ScoreJump),
            Some(Signal::ScoreJump)
        );
        assert_eq!(Signal::for_failure(ValidationFailure::ScoreTooLarge), None);
        assert_eq!(Signal::HashTamper.to_string(), "hash_tamper");
    }

    #[test]
    fn sweep_drops_idle_profiles() {
        let tracker = tracker();
        tracker.observe("idle", 0);
        tracker.observe("active", 1_700_000);
        assert_eq!(tracker.sweep(1_800_000), 1);
        assert_eq!(tracker.request_count("idle"), 0);
        assert_eq!(tracker.request_count("active"), 1);
    }
}
