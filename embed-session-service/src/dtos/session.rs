use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// First issuance for an upstream-authenticated embedding principal.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IssueRequest {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub workspace_id: Uuid,

    #[schema(example = "7c9e6679-7425-40de-944b-e07fc1f90ae7")]
    pub subject_id: Uuid,

    /// Hash input derived from client/browser signals by the caller.
    #[validate(length(min = 1, max = 1024, message = "Fingerprint is required"))]
    #[schema(example = "d2d2b0c3a1...")]
    pub fingerprint: String,

    /// Originating client address as seen by the upstream identity layer.
    #[validate(length(min = 1, max = 64, message = "Network address is required"))]
    #[schema(example = "203.0.113.9")]
    pub network_addr: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RotateRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "9f8e7d6c...")]
    pub refresh_token: String,

    #[validate(length(min = 1, max = 1024, message = "Fingerprint is required"))]
    #[schema(example = "d2d2b0c3a1...")]
    pub fingerprint: String,

    #[validate(length(min = 1, max = 64, message = "Network address is required"))]
    #[schema(example = "203.0.113.9")]
    pub network_addr: String,
}

/// Sign-out by family id or by the refresh token itself.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub family_id: Option<Uuid>,

    #[schema(example = "9f8e7d6c...")]
    pub refresh_token: Option<String>,

    #[schema(example = "203.0.113.9")]
    pub network_addr: Option<String>,
}
