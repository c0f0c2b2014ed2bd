//! Test helpers: an in-memory application with no Postgres or Redis.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use session_core::config::CommonConfig;
use session_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use embed_session_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, RateLimitConfig, RedisConfig, RetentionConfig,
        SecurityConfig, ServiceConfig, TokenConfig,
    },
    services::{
        AccessClaims, AccessTokenMinter, AuditLog, FixedWindowLimiter, MemoryReplayCache,
        QuotaSettings, ReplayCache, RotationEngine, SessionIssuer,
    },
    store::{MemorySessionStore, SessionStore},
    AppState,
};

pub const TEST_FINGERPRINT: &str = "fp-abc123";
pub const TEST_ADDR: &str = "203.0.113.9";

/// Config with quotas high enough that only rate-limit tests trip them.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        common: CommonConfig { port: 8080 },
        environment: Environment::Dev,
        service_name: "embed-session-service-test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused-in-tests".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused-in-tests".to_string(),
        },
        tokens: TokenConfig {
            signing_secret: SecretString::new(
                "test-signing-secret-that-is-long-enough-for-hmac".to_string(),
            ),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            rotation_grace_seconds: 30,
        },
        retention: RetentionConfig {
            retention_days: 30,
            sweep_interval_seconds: 3600,
        },
        rate_limit: RateLimitConfig {
            issue_max: 1000,
            issue_window_seconds: 60,
            rotate_max: 1000,
            rotate_window_seconds: 60,
            failed_auth_max: 1000,
            failed_auth_window_seconds: 300,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemorySessionStore>,
    pub replay: Arc<MemoryReplayCache>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_config())
    }

    pub fn spawn_with(config: ServiceConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryReplayCache::new()),
        )
    }

    /// Assemble the service stack over existing backing stores, e.g. to model
    /// a restart that kept the database but lost the replay cache.
    pub fn with_parts(
        config: ServiceConfig,
        store: Arc<MemorySessionStore>,
        replay: Arc<MemoryReplayCache>,
    ) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("info")
            .try_init();

        let store_dyn: Arc<dyn SessionStore> = store.clone();
        let replay_dyn: Arc<dyn ReplayCache> = replay.clone();

        let limiter = Arc::new(FixedWindowLimiter::new(QuotaSettings::from(
            &config.rate_limit,
        )));
        let minter = AccessTokenMinter::new(&config.tokens);
        let audit = AuditLog::new(store_dyn.clone());
        let rotation = RotationEngine::new(
            store_dyn.clone(),
            replay_dyn.clone(),
            minter.clone(),
            limiter.clone(),
            audit.clone(),
            &config.tokens,
        );
        let issuer = SessionIssuer::new(
            store_dyn.clone(),
            rotation,
            minter,
            limiter,
            audit,
            &config.tokens,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        let state = AppState {
            config,
            store: store_dyn,
            replay: replay_dyn,
            issuer,
            ip_rate_limiter,
        };

        Self {
            state,
            store,
            replay,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone()).expect("router must build")
    }

    /// Decode the claims of an access token minted by this app.
    pub fn claims(&self, access_token: &str) -> AccessClaims {
        AccessTokenMinter::new(&self.state.config.tokens)
            .verify(access_token)
            .expect("access token must verify")
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = self
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request must build"),
            )
            .await
            .expect("request must not fail at the transport level");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body must be readable");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body must be JSON")
        };
        (status, json)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let response = self
            .router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(path)
                    .body(Body::empty())
                    .expect("request must build"),
            )
            .await
            .expect("request must not fail at the transport level");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body must be readable");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body must be JSON")
        };
        (status, json)
    }

    /// Issue a session over HTTP and return the response body.
    pub async fn issue(&self, workspace_id: Uuid, subject_id: Uuid) -> serde_json::Value {
        let (status, body) = self
            .post_json(
                "/session/issue",
                serde_json::json!({
                    "workspace_id": workspace_id,
                    "subject_id": subject_id,
                    "fingerprint": TEST_FINGERPRINT,
                    "network_addr": TEST_ADDR,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "issue failed: {body}");
        body
    }

    /// Rotate over HTTP, returning status and body.
    pub async fn rotate(&self, refresh_token: &str) -> (StatusCode, serde_json::Value) {
        self.post_json(
            "/session/rotate",
            serde_json::json!({
                "refresh_token": refresh_token,
                "fingerprint": TEST_FINGERPRINT,
                "network_addr": TEST_ADDR,
            }),
        )
        .await
    }
}
