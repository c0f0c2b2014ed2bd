pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use session_core::error::AppError;
use session_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::config::ServiceConfig;
use crate::services::{ServiceError, SessionIssuer};
use crate::store::{SessionStore, StoreError};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::session::issue,
        handlers::session::rotate,
        handlers::session::revoke,
    ),
    components(
        schemas(
            dtos::ErrorBody,
            dtos::session::IssueRequest,
            dtos::session::RotateRequest,
            dtos::session::RevokeRequest,
            services::SessionTokenPair,
        )
    ),
    tags(
        (name = "Session", description = "Embedded-session issuance, rotation, and revocation"),
        (name = "Observability", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub store: Arc<dyn SessionStore>,
    pub replay: Arc<dyn services::ReplayCache>,
    pub issuer: SessionIssuer,
    pub ip_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
        })
        .collect::<Result<Vec<HeaderValue>, AppError>>()?;

    let ip_limiter = state.ip_rate_limiter.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/session/issue", post(handlers::session::issue))
        .route("/session/rotate", post(handlers::session::rotate))
        .route("/session/revoke", post(handlers::session::revoke))
        .with_state(state)
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        // Trace every request with its correlation id
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::HeaderName::from_static("x-request-id"),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A backing store is unreachable", body = ErrorBody)
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        ServiceError::Storage(e)
    })?;

    state.replay.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Replay cache health check failed");
        ServiceError::Storage(StoreError::Unavailable(e))
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "checks": {
            "store": "up",
            "replay_cache": "up"
        }
    })))
}
