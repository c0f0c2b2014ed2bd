//! Idempotent replay inside the grace window.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use embed_session_service::models::AuditEventKind;
use embed_session_service::store::SessionStore;
use uuid::Uuid;

#[tokio::test]
async fn double_submit_within_grace_returns_the_identical_pair() {
    let app = TestApp::spawn();
    let issued = app.issue(Uuid::new_v4(), Uuid::new_v4()).await;
    let original_refresh = issued["refresh_token"].as_str().unwrap().to_string();

    let (status, first) = app.rotate(&original_refresh).await;
    assert_eq!(status, StatusCode::OK);

    // The client re-submits the already-consumed token, e.g. after a network
    // timeout. It must get the same successor pair, not an error.
    let (status, second) = app.rotate(&original_refresh).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["access_token"], second["access_token"]);
    assert_eq!(first["refresh_token"], second["refresh_token"]);
    assert_eq!(first["refresh_expires_utc"], second["refresh_expires_utc"]);

    // Exactly one Rotated event exists for the chain; the replay is recorded
    // as a low-severity note, never as a second rotation.
    let family_id = app.claims(issued["access_token"].as_str().unwrap()).fam;
    let events = app.state.store.family_events(family_id).await.unwrap();
    let rotated = events
        .iter()
        .filter(|e| e.kind == AuditEventKind::Rotated)
        .count();
    assert_eq!(rotated, 1);
    assert!(events
        .iter()
        .any(|e| e.kind == AuditEventKind::Issued && e.detail.contains("replay")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_converge_on_one_pair() {
    let app = TestApp::spawn();
    let issued = app.issue(Uuid::new_v4(), Uuid::new_v4()).await;
    let refresh = issued["refresh_token"].as_str().unwrap().to_string();

    let issuer_a = app.state.issuer.clone();
    let issuer_b = app.state.issuer.clone();
    let refresh_a = refresh.clone();
    let refresh_b = refresh.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            issuer_a
                .rotate(&refresh_a, common::TEST_FINGERPRINT, common::TEST_ADDR)
                .await
        }),
        tokio::spawn(async move {
            issuer_b
                .rotate(&refresh_b, common::TEST_FINGERPRINT, common::TEST_ADDR)
                .await
        }),
    );

    let pair_a = a.unwrap().expect("both rotations must succeed");
    let pair_b = b.unwrap().expect("both rotations must succeed");

    // One call won the conditional update; the other was answered from the
    // replay cache with the identical pair.
    assert_eq!(pair_a.access_token, pair_b.access_token);
    assert_eq!(pair_a.refresh_token, pair_b.refresh_token);

    let family_id = app.claims(issued["access_token"].as_str().unwrap()).fam;
    let events = app.state.store.family_events(family_id).await.unwrap();
    let rotated = events
        .iter()
        .filter(|e| e.kind == AuditEventKind::Rotated)
        .count();
    assert_eq!(rotated, 1);
}

#[tokio::test]
async fn replay_with_a_cold_cache_requires_reauth() {
    let app = TestApp::spawn();
    let issued = app.issue(Uuid::new_v4(), Uuid::new_v4()).await;
    let original_refresh = issued["refresh_token"].as_str().unwrap().to_string();

    let (status, _) = app.rotate(&original_refresh).await;
    assert_eq!(status, StatusCode::OK);

    // Model a restart that kept the token store but lost the replay cache:
    // the store still says "consumed within grace", but the pair is gone.
    let app = TestApp::with_parts(
        app.state.config.clone(),
        app.store.clone(),
        std::sync::Arc::new(embed_session_service::services::MemoryReplayCache::new()),
    );

    // Within grace but unanswerable: benign re-auth, not a reuse verdict.
    let (status, body) = app.rotate(&original_refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");

    // The family survives; the active successor still rotates normally.
    let family_id = app.claims(issued["access_token"].as_str().unwrap()).fam;
    let family = app
        .state
        .store
        .find_family(family_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!family.is_revoked());
}
