//! Session lifecycle endpoints.
//!
//! The game client opens a session when a run starts, reports its state while
//! playing and asks for a session token right before submitting.

use super::{ErrorBody, error_response, extract_client_ip, invalid_origin, normalize_player};
use crate::{api::OriginGuard, gate::AdmissionPipeline};
use axum::{
    extract::{Extension, Json, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct CreateSession {
    #[serde(alias = "playerAddress")]
    player: String,
    #[serde(default, alias = "opaqueKeys")]
    #[schema(value_type = Object)]
    opaque_keys: Option<Value>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionCreated {
    pub session_id: String,
    pub expires_at: i64,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct UpdateState {
    #[serde(alias = "sessionId")]
    session_id: String,
    #[serde(alias = "playerAddress")]
    player: String,
    #[serde(alias = "gameState")]
    #[schema(value_type = Object)]
    game_state: Value,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StateUpdated {
    pub session_id: String,
    #[schema(value_type = Object)]
    pub game_state: Value,
    pub expires_at: i64,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct TokenRequest {
    #[serde(alias = "playerAddress")]
    player: String,
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default, alias = "gameState")]
    #[schema(value_type = Object)]
    game_state: Option<Value>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenIssued {
    pub session_token: String,
    /// Milliseconds the token stays acceptable.
    pub valid_for_ms: i64,
}

fn invalid_player() -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "invalid_player",
        "player must be a 0x-prefixed 40 character hex address",
    )
}

fn store_unavailable(err: &anyhow::Error) -> Response {
    error!("Session store failure: {err:#}");
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "unavailable",
        "session storage is unavailable",
    )
}

fn session_not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "session_not_found",
        "session does not exist or has expired",
    )
}

#[utoipa::path(
    post,
    path= "/session",
    request_body = CreateSession,
    responses (
        (status = 201, description = "Session created", body = SessionCreated),
        (status = 400, description = "Invalid player address", body = ErrorBody),
        (status = 403, description = "Foreign origin", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody),
    ),
    tag= "session",
)]
#[instrument(skip(pipeline, origins, headers, payload))]
pub async fn create_session(
    pipeline: Extension<Arc<AdmissionPipeline>>,
    origins: Extension<OriginGuard>,
    headers: HeaderMap,
    payload: Json<CreateSession>,
) -> Response {
    if !origins.permits(&headers) {
        return invalid_origin();
    }
    let Some(player) = normalize_player(&payload.player) else {
        return invalid_player();
    };
    let opaque_keys = payload
        .0
        .opaque_keys
        .unwrap_or_else(|| Value::Object(Map::new()));

    match pipeline
        .sessions()
        .create(&player, opaque_keys, pipeline.now_ms())
        .await
    {
        Ok(session) => (
            StatusCode::CREATED,
            Json(SessionCreated {
                session_id: session.session_id,
                expires_at: session.expires_at,
            }),
        )
            .into_response(),
        Err(err) => store_unavailable(&err),
    }
}

#[utoipa::path(
    post,
    path= "/session/state",
    request_body = UpdateState,
    responses (
        (status = 200, description = "Game state merged into the session", body = StateUpdated),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Foreign origin or session owned by another player", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody),
    ),
    tag= "session",
)]
#[instrument(skip(pipeline, origins, headers, payload), fields(session_id = %payload.session_id))]
pub async fn update_state(
    pipeline: Extension<Arc<AdmissionPipeline>>,
    origins: Extension<OriginGuard>,
    headers: HeaderMap,
    payload: Json<UpdateState>,
) -> Response {
    if !origins.permits(&headers) {
        return invalid_origin();
    }
    let Some(player) = normalize_player(&payload.player) else {
        return invalid_player();
    };
    if !payload.game_state.is_object() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_game_state",
            "game state must be a JSON object",
        );
    }

    let store = pipeline.sessions();
    let now = pipeline.now_ms();
    let session = match store.get(&payload.session_id, now).await {
        Ok(Some(session)) => session,
        Ok(None) => return session_not_found(),
        Err(err) => return store_unavailable(&err),
    };
    if !session.player.eq_ignore_ascii_case(&player) {
        warn!("game state update for a session owned by another player");
        return error_response(
            StatusCode::FORBIDDEN,
            "session_owner_mismatch",
            "session belongs to another player",
        );
    }

    let UpdateState {
        session_id,
        game_state,
        ..
    } = payload.0;
    match store.merge_game_state(&session_id, game_state, now).await {
        Ok(Some(session)) => Json(StateUpdated {
            session_id: session.session_id,
            game_state: session.game_state,
            expires_at: session.expires_at,
        })
        .into_response(),
        Ok(None) => session_not_found(),
        Err(err) => store_unavailable(&err),
    }
}

#[utoipa::path(
    post,
    path= "/session/token",
    request_body = TokenRequest,
    responses (
        (status = 200, description = "Session token for the current time bucket", body = TokenIssued),
        (status = 400, description = "Invalid player address", body = ErrorBody),
        (status = 403, description = "Foreign origin or session owned by another player", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 500, description = "Token secret is not configured", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody),
    ),
    tag= "session",
)]
#[instrument(skip(pipeline, origins, headers, payload))]
pub async fn issue_token(
    pipeline: Extension<Arc<AdmissionPipeline>>,
    origins: Extension<OriginGuard>,
    headers: HeaderMap,
    payload: Json<TokenRequest>,
) -> Response {
    if !origins.permits(&headers) {
        return invalid_origin();
    }
    let Some(player) = normalize_player(&payload.player) else {
        return invalid_player();
    };

    // Bind the token to the same snapshot the submit path will verify against.
    let TokenRequest {
        session_id,
        game_state,
        ..
    } = payload.0;
    let snapshot = match (game_state, session_id) {
        (Some(state), _) => state,
        (None, Some(session_id)) => {
            match pipeline.sessions().get(&session_id, pipeline.now_ms()).await {
                Ok(Some(session)) if session.player.eq_ignore_ascii_case(&player) => {
                    session.game_state
                }
                Ok(Some(_)) => {
                    return error_response(
                        StatusCode::FORBIDDEN,
                        "session_owner_mismatch",
                        "session belongs to another player",
                    );
                }
                Ok(None) => return session_not_found(),
                Err(err) => return store_unavailable(&err),
            }
        }
        (None, None) => Value::Object(Map::new()),
    };

    let salt = extract_client_ip(&headers)
        .map_or_else(|| "ip_unknown".to_string(), |ip| format!("ip_{ip}"));
    let tokens = pipeline.tokens();
    match tokens.issue_now(&player, &snapshot, &salt) {
        Ok(session_token) => Json(TokenIssued {
            session_token,
            valid_for_ms: tokens.config().window_ms,
        })
        .into_response(),
        Err(err) => {
            error!("Cannot issue session token: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration",
                "service is not configured to issue tokens",
            )
        }
    }
}

#[utoipa::path(
    delete,
    path= "/session/{session_id}",
    params(("session_id" = String, Path, description = "Session identifier")),
    responses (
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ErrorBody),
        (status = 503, description = "Session store unavailable", body = ErrorBody),
    ),
    tag= "session",
)]
#[instrument(skip(pipeline))]
pub async fn delete_session(
    pipeline: Extension<Arc<AdmissionPipeline>>,
    Path(session_id): Path<String>,
) -> Response {
    match pipeline.sessions().delete(&session_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => session_not_found(),
        Err(err) => store_unavailable(&err),
    }
}
