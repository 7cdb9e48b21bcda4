use super::{
    ErrorBody, commit_error_response, error_response, invalid_origin, normalize_player,
    rejection_response, request_context,
};
use crate::{
    api::OriginGuard,
    gate::{AdmissionPipeline, Decision, GateError, Submission, commit::Committer},
};
use axum::{
    extract::{Extension, Json},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct ScoreSubmission {
    #[serde(alias = "playerAddress")]
    player: String,
    #[serde(alias = "scoreAmount")]
    score: i64,
    #[serde(alias = "transactionAmount")]
    transaction_count: i64,
    #[serde(alias = "sessionToken")]
    session_token: String,
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default, alias = "gameState")]
    #[schema(value_type = Object)]
    game_state: Option<Value>,
    #[serde(default, alias = "gameStateHash")]
    content_hash: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ScoreRecorded {
    pub request_id: String,
    pub tx_hash: String,
}

#[utoipa::path(
    post,
    path= "/submit",
    request_body = ScoreSubmission,
    responses (
        (status = 200, description = "Score admitted and committed", body = ScoreRecorded),
        (status = 400, description = "Invalid input or validation failure", body = ErrorBody),
        (status = 401, description = "Invalid or expired session token", body = ErrorBody),
        (status = 402, description = "Chain writer has insufficient funds", body = ErrorBody),
        (status = 403, description = "Foreign origin, request blocked or writer not authorized", body = ErrorBody),
        (status = 409, description = "Identical request already in flight", body = ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = ErrorBody),
        (status = 500, description = "Token secret is not configured", body = ErrorBody),
        (status = 502, description = "Chain writer failed", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody),
    ),
    tag= "submit",
)]
#[instrument(skip(pipeline, committer, origins, headers, payload))]
pub async fn submit(
    pipeline: Extension<Arc<AdmissionPipeline>>,
    committer: Extension<Arc<dyn Committer>>,
    origins: Extension<OriginGuard>,
    headers: HeaderMap,
    payload: Json<ScoreSubmission>,
) -> Response {
    if !origins.permits(&headers) {
        return invalid_origin();
    }

    let Some(player) = normalize_player(&payload.player) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_player",
            "player must be a 0x-prefixed 40 character hex address",
        );
    };

    let ScoreSubmission {
        score,
        transaction_count,
        session_token,
        session_id,
        game_state,
        content_hash,
        ..
    } = payload.0;
    let submission = Submission {
        player,
        score,
        transaction_count,
        session_token,
        session_id,
        game_state,
        content_hash,
    };
    let context = request_context(&headers);

    let admission = match pipeline.admit(&submission, &context).await {
        Ok(Decision::Admitted(admission)) => admission,
        Ok(Decision::Rejected(rejection)) => {
            return rejection_response(&rejection, pipeline.now_ms());
        }
        Err(GateError::Infrastructure(err)) => {
            error!("Admission failed: {err:#}");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "service temporarily unavailable",
            );
        }
    };

    match committer
        .commit(&submission.player, submission.score, submission.transaction_count)
        .await
    {
        Ok(receipt) => {
            pipeline.complete(&admission.request_id);
            info!(
                request_id = %admission.request_id,
                tx_hash = %receipt.tx_hash,
                "score recorded"
            );
            Json(ScoreRecorded {
                request_id: admission.request_id,
                tx_hash: receipt.tx_hash,
            })
            .into_response()
        }
        // The pending entry stays until it times out, so an immediate resend is a duplicate.
        Err(err) => commit_error_response(&err),
    }
}
