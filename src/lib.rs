//! # Scoregate (Score Admission Gate)
//!
//! `scoregate` sits between a browser game and an on-chain leaderboard. Every
//! "player scored X points" submission is untrusted; the gate decides whether
//! it may be forwarded to the chain writer, which is slow, costs gas and cannot
//! be undone.
//!
//! ## Admission Pipeline
//!
//! Submissions pass a fixed sequence of stages (see [`gate::pipeline`]):
//!
//! 1. **Deduplication:** identical in-flight requests are collapsed.
//! 2. **Rate limiting:** per client address and per player, with a slower
//!    window for high scores.
//! 3. **Session token:** an HMAC bound to the player, a 30 second time bucket
//!    and the reported game state, accepted for ten minutes.
//! 4. **Score validation:** bounds, score-per-transaction ratio, level ceiling,
//!    session cross-check, game-state snapshot and velocity checks.
//! 5. **Behavior:** suspicion signals accumulate per client; more than three
//!    block the client.
//!
//! This is a best-effort heuristic gate, not a sound anti-cheat system. It
//! raises the cost of replaying or forging submissions and bounds write
//! throughput.
//!
//! ## State
//!
//! Keyed stores (rate windows, pending requests, submission history, client
//! profiles) are in-process and swept periodically. Sessions live in
//! `PostgreSQL` (`db/sql/01_sessions.sql`) or, for development, in memory.

pub mod api;
pub mod cli;
pub mod gate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// First seven characters of a commit hash.
#[must_use]
pub fn short_commit(hash: &str) -> &str {
    let hash = hash.trim();
    hash.get(..7).unwrap_or(hash)
}

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
