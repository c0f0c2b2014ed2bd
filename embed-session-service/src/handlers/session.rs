use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{
    dtos::session::{IssueRequest, RevokeRequest, RotateRequest},
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Issue a new session family for an embedding principal
#[utoipa::path(
    post,
    path = "/session/issue",
    request_body = IssueRequest,
    responses(
        (status = 200, description = "Session issued", body = SessionTokenPair),
        (status = 422, description = "Validation error", body = ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    ),
    tag = "Session"
)]
pub async fn issue(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<IssueRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let pair = state
        .issuer
        .issue(
            req.workspace_id,
            req.subject_id,
            &req.fingerprint,
            &req.network_addr,
        )
        .await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// Rotate a refresh token into the next generation
#[utoipa::path(
    post,
    path = "/session/rotate",
    request_body = RotateRequest,
    responses(
        (status = 200, description = "Token rotated", body = SessionTokenPair),
        (status = 401, description = "Invalid or expired token", body = ErrorBody),
        (status = 403, description = "Reuse detected; family revoked", body = ErrorBody),
        (status = 422, description = "Validation error", body = ErrorBody),
        (status = 429, description = "Rate limit exceeded", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    ),
    tag = "Session"
)]
pub async fn rotate(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RotateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let pair = state
        .issuer
        .rotate(&req.refresh_token, &req.fingerprint, &req.network_addr)
        .await?;
    Ok((StatusCode::OK, Json(pair)))
}

/// Revoke a session family (explicit sign-out)
#[utoipa::path(
    post,
    path = "/session/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 204, description = "Family revoked (idempotent)"),
        (status = 422, description = "Neither family_id nor refresh_token supplied", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    ),
    tag = "Session"
)]
pub async fn revoke(
    State(state): State<AppState>,
    Json(req): Json<RevokeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let network_addr = req.network_addr.as_deref().unwrap_or("unknown");

    if let Some(family_id) = req.family_id {
        state.issuer.revoke_family(family_id, network_addr).await?;
    } else if let Some(refresh_token) = req.refresh_token.as_deref() {
        state
            .issuer
            .revoke_presented(refresh_token, network_addr)
            .await?;
    } else {
        return Err(ServiceError::Validation(
            "Either family_id or refresh_token must be supplied".to_string(),
        ));
    }

    Ok(StatusCode::NO_CONTENT)
}
