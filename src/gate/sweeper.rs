//! Background garbage collection for the pipeline's keyed stores.
//!
//! The request path never deletes expired entries on its own, so without the
//! sweeper memory grows with the number of distinct clients seen.

use crate::gate::pipeline::AdmissionPipeline;
use std::{sync::Arc, time::Duration};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error};

/// Spawn a task that sweeps `pipeline` every `period`.
pub fn spawn_sweeper(
    pipeline: Arc<AdmissionPipeline>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match pipeline.sweep().await {
                Ok(report) => debug!(
                    rate_windows = report.rate_windows,
                    pending_requests = report.pending_requests,
                    submission_records = report.submission_records,
                    client_profiles = report.client_profiles,
                    sessions = report.sessions,
                    "sweep completed"
                ),
                Err(err) => error!("sweep failed: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{
        clock::ManualClock,
        config::GateConfig,
        pipeline::{RequestContext, Submission},
        session::MemorySessionStore,
    };
    use secrecy::SecretString;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let pipeline = Arc::new(AdmissionPipeline::new(
            GateConfig::new(),
            Some(SecretString::from("sweeper-secret")),
            Arc::new(MemorySessionStore::default()),
            clock.clone(),
        ));

        let player = "0x1111111111111111111111111111111111111111";
        let state = json!({"score": 10});
        let submission = Submission {
            player: player.to_string(),
            score: 10,
            transaction_count: 1,
            session_token: pipeline.tokens().issue_now(player, &state, "").unwrap(),
            session_id: None,
            game_state: Some(state),
            content_hash: None,
        };
        let context = RequestContext::default();
        assert!(pipeline.admit(&submission, &context).await.unwrap().is_admitted());

        let key = format!("{player}-unknown");
        assert_eq!(pipeline.behavior().request_count(&key), 1);

        let handle = spawn_sweeper(pipeline.clone(), Duration::from_secs(60));
        clock.advance(60 * 60 * 1000);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(pipeline.behavior().request_count(&key), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(pipeline.behavior().request_count(&key), 0);
        handle.abort();
    }
}
