use crate::gate::{AdmissionPipeline, commit::Committer, sweeper::spawn_sweeper};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    routing::options,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;
pub mod origin;

pub use openapi::openapi;
pub use origin::OriginGuard;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[derive(Clone, Copy, Debug, Default)]
struct UlidRequestId;

impl MakeRequestId for UlidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Ulid::new().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The HTTP application: documented routes, request ids, tracing, CORS, the
/// origin check and the shared pipeline and committer.
///
/// # Errors
/// Returns an error if `allowed_origin` is not a URL with a host.
pub fn app(
    pipeline: Arc<AdmissionPipeline>,
    committer: Arc<dyn Committer>,
    allowed_origin: Option<&str>,
) -> Result<Router> {
    let origins = OriginGuard::new(allowed_origin)?;
    let cors = cors_layer(&origins);
    let (router, _openapi) = router().split_for_parts();
    Ok(router
        // preflight-only, not part of the document
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(REQUEST_ID, UlidRequestId))
                .layer(PropagateRequestIdLayer::new(REQUEST_ID))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(cors)
                .layer(Extension(pipeline))
                .layer(Extension(committer))
                .layer(Extension(origins)),
        ))
}

/// CORS for the game frontend. Without an origin any origin is allowed.
fn cors_layer(origins: &OriginGuard) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::DELETE]);
    match origins.allowed() {
        Some(origin) => cors.allow_origin(AllowOrigin::exact(origin.clone())),
        None => cors.allow_origin(Any),
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    pipeline: Arc<AdmissionPipeline>,
    committer: Arc<dyn Committer>,
    allowed_origin: Option<&str>,
    sweep_interval: Duration,
) -> Result<()> {
    let app = app(pipeline.clone(), committer, allowed_origin)?;

    // Expired rate windows, pending requests, profiles and sessions are only
    // reclaimed by the sweeper.
    let sweeper = spawn_sweeper(pipeline.clone(), sweep_interval);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.abort();

    Ok(())
}

fn request_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let request_id = headers
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none");
    let client_ip = handlers::extract_client_ip(headers);
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = route,
        client.ip = client_ip.as_deref().unwrap_or("unknown"),
        request_id
    )
}
