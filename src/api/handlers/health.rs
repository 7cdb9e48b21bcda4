use crate::{GIT_COMMIT_HASH, gate::AdmissionPipeline, short_commit};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    /// `ok` or `error`
    session_store: String,
    session_backend: String,
    /// `configured` or `missing`; without a secret every submission is refused.
    token_secret: String,
}

/// `name:version:short-commit`
fn x_app(name: &str, version: &str, commit: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{name}:{version}:{}", short_commit(commit)))
        .map_err(|err| error!("Failed to build X-App header: {err}"))
        .ok()
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Session store is reachable", body = [Health]),
        (status = 503, description = "Session store is unreachable", body = [Health])
    ),
    tag= "health"
)]
// also mounted for OPTIONS, which gets the headers without a body
pub async fn health(method: Method, pipeline: Extension<Arc<AdmissionPipeline>>) -> Response {
    let store = pipeline.sessions();
    let store_ok = match store.ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to reach session store: {err:#}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_store: if store_ok { "ok" } else { "error" }.to_string(),
        session_backend: store.backend().to_string(),
        token_secret: if pipeline.tokens().is_configured() {
            "configured"
        } else {
            "missing"
        }
        .to_string(),
    };

    let mut headers = HeaderMap::new();
    if let Some(value) = x_app(&health.name, &health.version, &health.commit) {
        debug!("X-App header: {value:?}");
        headers.insert("x-app", value);
    }

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    if method == Method::GET {
        (status, headers, Json(health)).into_response()
    } else {
        (status, headers, Body::empty()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{
        GateConfig,
        clock::ManualClock,
        session::{MemorySessionStore, SessionStore, StoreFuture},
    };
    use anyhow::anyhow;
    use secrecy::SecretString;

    #[derive(Debug)]
    struct DownStore;

    impl SessionStore for DownStore {
        fn create<'a>(
            &'a self,
            _player: &'a str,
            _opaque_keys: serde_json::Value,
            _now: i64,
        ) -> StoreFuture<'a, crate::gate::session::Session> {
            Box::pin(async { Err(anyhow!("down")) })
        }

        fn get<'a>(
            &'a self,
            _session_id: &'a str,
            _now: i64,
        ) -> StoreFuture<'a, Option<crate::gate::session::Session>> {
            Box::pin(async { Err(anyhow!("down")) })
        }

        fn merge_game_state<'a>(
            &'a self,
            _session_id: &'a str,
            _patch: serde_json::Value,
            _now: i64,
        ) -> StoreFuture<'a, Option<crate::gate::session::Session>> {
            Box::pin(async { Err(anyhow!("down")) })
        }

        fn delete<'a>(&'a self, _session_id: &'a str) -> StoreFuture<'a, bool> {
            Box::pin(async { Err(anyhow!("down")) })
        }

        fn sweep(&self, _now: i64) -> StoreFuture<'_, usize> {
            Box::pin(async { Err(anyhow!("down")) })
        }

        fn ping(&self) -> StoreFuture<'_, ()> {
            Box::pin(async { Err(anyhow!("connection refused")) })
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    fn pipeline(
        store: Arc<dyn SessionStore>,
        secret: Option<&str>,
    ) -> Extension<Arc<AdmissionPipeline>> {
        Extension(Arc::new(AdmissionPipeline::new(
            GateConfig::new(),
            secret.map(SecretString::from),
            store,
            Arc::new(ManualClock::new(0)),
        )))
    }

    #[test]
    fn x_app_uses_short_commit() {
        let value = x_app("scoregate", "1.2.3", "0123456789abcdef").unwrap();
        assert_eq!(value, "scoregate:1.2.3:0123456");
    }

    #[tokio::test]
    async fn healthy_store_answers_ok() {
        let response = health(
            Method::GET,
            pipeline(Arc::new(MemorySessionStore::default()), Some("secret")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-app"));
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let response = health(Method::GET, pipeline(Arc::new(DownStore), None)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn options_has_no_body() {
        let response = health(
            Method::OPTIONS,
            pipeline(Arc::new(MemorySessionStore::default()), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }
}
