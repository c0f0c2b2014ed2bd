//! Explicit sign-out.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use embed_session_service::models::AuditEventKind;
use embed_session_service::store::SessionStore;
use uuid::Uuid;

#[tokio::test]
async fn revoke_by_family_id_is_idempotent() {
    let app = TestApp::spawn();
    let issued = app.issue(Uuid::new_v4(), Uuid::new_v4()).await;
    let family_id = app.claims(issued["access_token"].as_str().unwrap()).fam;

    let (status, _) = app
        .post_json(
            "/session/revoke",
            serde_json::json!({ "family_id": family_id, "network_addr": common::TEST_ADDR }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Revoking again is a no-op success and records no second event.
    let (status, _) = app
        .post_json(
            "/session/revoke",
            serde_json::json!({ "family_id": family_id, "network_addr": common::TEST_ADDR }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let events = app.state.store.family_events(family_id).await.unwrap();
    let revoked = events
        .iter()
        .filter(|e| e.kind == AuditEventKind::Revoked)
        .count();
    assert_eq!(revoked, 1);

    // The refresh token is gone for good.
    let (status, body) = app.rotate(issued["refresh_token"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");
}

#[tokio::test]
async fn revoke_by_refresh_token() {
    let app = TestApp::spawn();
    let issued = app.issue(Uuid::new_v4(), Uuid::new_v4()).await;
    let refresh = issued["refresh_token"].as_str().unwrap();

    let (status, _) = app
        .post_json(
            "/session/revoke",
            serde_json::json!({ "refresh_token": refresh, "network_addr": common::TEST_ADDR }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.rotate(refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoking_an_unknown_family_succeeds_quietly() {
    let app = TestApp::spawn();
    let (status, _) = app
        .post_json(
            "/session/revoke",
            serde_json::json!({ "family_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn revoke_requires_a_selector() {
    let app = TestApp::spawn();
    let (status, body) = app.post_json("/session/revoke", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
}
