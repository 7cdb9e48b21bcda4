//! In-flight request deduplication.
//!
//! Identical submissions (same player, score and transaction count) are
//! collapsed while the first one is still being processed. An entry left in
//! `Processing` by a caller that never finished is superseded once it is older
//! than the processing timeout.

use crate::gate::config::DedupConfig;
use dashmap::{DashMap, mapref::entry::Entry};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Fresh,
    /// A stale entry with the same id was replaced.
    Superseded,
    Duplicate {
        retry_at: i64,
    },
}

impl DedupOutcome {
    #[must_use]
    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    Processing,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    since: i64,
    state: PendingState,
}

/// `hex(sha256(player | score | transaction_count))`
#[must_use]
pub fn request_id(player: &str, score: i64, transaction_count: i64) -> String {
    let digest = Sha256::digest(format!("{player}|{score}|{transaction_count}").as_bytes());
    hex::encode(digest)
}

#[derive(Debug)]
pub struct RequestDeduplicator {
    pending: DashMap<String, PendingRequest>,
    config: DedupConfig,
}

impl RequestDeduplicator {
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self {
            pending: DashMap::new(),
            config,
        }
    }

    /// Register `request_id` as processing unless an identical request is
    /// still live.
    pub fn check(&self, request_id: &str, now: i64) -> DedupOutcome {
        match self.pending.entry(request_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(PendingRequest {
                    since: now,
                    state: PendingState::Processing,
                });
                DedupOutcome::Fresh
            }
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                if let Some(retry_at) = self.blocks_until(pending, now) {
                    return DedupOutcome::Duplicate { retry_at };
                }
                debug!(request_id, "superseding abandoned request");
                *pending = PendingRequest {
                    since: now,
                    state: PendingState::Processing,
                };
                DedupOutcome::Superseded
            }
        }
    }

    pub fn is_duplicate(&self, request_id: &str, now: i64) -> bool {
        self.check(request_id, now).is_duplicate()
    }

    /// Called after the downstream commit succeeded.
    pub fn mark_complete(&self, request_id: &str, now: i64) {
        if self.config.completed_hold_ms > 0 {
            if let Some(mut pending) = self.pending.get_mut(request_id) {
                pending.since = now;
                pending.state = PendingState::Done;
            }
        } else {
            self.pending.remove(request_id);
        }
    }

    /// Forget a processing entry whose submission was rejected later on.
    pub fn release(&self, request_id: &str) {
        self.pending
            .remove_if(request_id, |_, pending| pending.state == PendingState::Processing);
    }

    pub fn sweep(&self, now: i64) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| self.blocks_until(pending, now).is_some());
        before.saturating_sub(self.pending.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn blocks_until(&self, pending: &PendingRequest, now: i64) -> Option<i64> {
        let hold = match pending.state {
            PendingState::Processing => self.config.processing_timeout_ms,
            PendingState::Done => self.config.completed_hold_ms,
        };
        let until = pending.since + hold;
        (now < until).then_some(until)
    }
}
