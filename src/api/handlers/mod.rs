//! HTTP handlers and the helpers they share: input checks, client metadata
//! extraction and the mapping from gate outcomes to responses.

pub mod health;
pub mod session;
pub mod submit;

use crate::gate::{
    RejectReason, Rejection, commit::CommitError, pipeline::RequestContext,
};
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `0x` followed by 40 hex characters.
pub fn valid_player(player: &str) -> bool {
    Regex::new(r"^0x[0-9a-fA-F]{40}$").is_ok_and(|re| re.is_match(player))
}

/// Trim and lowercase a player address, or `None` if it is malformed.
pub fn normalize_player(player: &str) -> Option<String> {
    let player = player.trim();
    valid_player(player).then(|| player.to_ascii_lowercase())
}

/// Extract a client IP from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn request_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        client_ip: extract_client_ip(headers),
        user_agent: headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    /// Unix milliseconds after which a retry may succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// 403 for a caller outside the configured frontend origin.
pub fn invalid_origin() -> Response {
    error_response(StatusCode::FORBIDDEN, "invalid_origin", "invalid origin")
}

pub fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        message: message.into(),
        retry_after: None,
        stage: None,
    };
    (status, Json(body)).into_response()
}

#[must_use]
pub fn rejection_status(reason: RejectReason) -> StatusCode {
    match reason {
        RejectReason::Authentication => StatusCode::UNAUTHORIZED,
        RejectReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        RejectReason::Duplicate => StatusCode::CONFLICT,
        RejectReason::Validation(_) => StatusCode::BAD_REQUEST,
        RejectReason::BehaviorBlock => StatusCode::FORBIDDEN,
        RejectReason::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn rejection_response(rejection: &Rejection, now: i64) -> Response {
    let error = match rejection.reason {
        RejectReason::Validation(failure) => failure.code(),
        other => other.code(),
    };
    let body = ErrorBody {
        error: error.to_string(),
        message: rejection.reason.to_string(),
        retry_after: rejection.retry_after,
        stage: Some(rejection.stage.to_string()),
    };

    let mut headers = HeaderMap::new();
    if let Some(retry_after) = rejection.retry_after {
        // Retry-After is whole seconds, rounded up.
        let seconds = (retry_after - now).max(0).div_euclid(1000)
            + i64::from((retry_after - now).rem_euclid(1000) > 0);
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            headers.insert(RETRY_AFTER, value);
        }
    }

    (rejection_status(rejection.reason), headers, Json(body)).into_response()
}

#[must_use]
pub fn commit_status(err: &CommitError) -> StatusCode {
    match err {
        CommitError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        CommitError::PermissionDenied => StatusCode::FORBIDDEN,
        CommitError::Connectivity(_) | CommitError::Failed(_) => StatusCode::BAD_GATEWAY,
    }
}

pub fn commit_error_response(err: &CommitError) -> Response {
    // Upstream details stay in the logs.
    let message = match err {
        CommitError::InsufficientFunds | CommitError::PermissionDenied => err.to_string(),
        CommitError::Connectivity(_) => "chain writer unreachable".to_string(),
        CommitError::Failed(_) => "failed to record score".to_string(),
    };
    error_response(commit_status(err), err.code(), message)
}
