//! Access-token minting and verification.
//!
//! Access tokens are HS256-signed JWTs carrying their own expiry; they are
//! never persisted. Each one is bound 1:1 to the refresh-token generation
//! that produced it via the `jti` claim.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::SessionFamily;

/// Claims embedded in every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject - the embedding principal.
    pub sub: Uuid,
    /// Workspace the session is scoped to.
    pub wsp: Uuid,
    /// Owning session family.
    pub fam: Uuid,
    /// The refresh-token generation this access token is paired with.
    pub jti: Uuid,
    /// Issued-at (UTC Unix timestamp).
    pub iat: i64,
    /// Expiration (UTC Unix timestamp).
    pub exp: i64,
}

/// Token pair returned to the embedding caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionTokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    pub access_expires_utc: DateTime<Utc>,
    pub refresh_expires_utc: DateTime<Utc>,
}

/// Mints and verifies HS256 access tokens.
#[derive(Clone)]
pub struct AccessTokenMinter {
    signing_secret: SecretString,
    access_ttl: Duration,
}

impl AccessTokenMinter {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            signing_secret: config.signing_secret.clone(),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
        }
    }

    /// Mint an access token for one generation of a family.
    ///
    /// Returns the encoded token and its expiry instant.
    pub fn mint(
        &self,
        family: &SessionFamily,
        generation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        let exp = now + self.access_ttl;
        let claims = AccessClaims {
            sub: family.subject_id,
            wsp: family.workspace_id,
            fam: family.family_id,
            jti: generation_id,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.signing_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok((token, exp))
    }

    /// Validate signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, anyhow::Error> {
        let token_data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.signing_secret.expose_secret().as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }
}
