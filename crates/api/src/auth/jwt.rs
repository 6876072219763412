//! JWT validation for staff and client sessions
//!
//! Tokens are issued by the back-office login flow; this crate only verifies
//! them. `generate_token` exists for tooling and tests.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use frontdesk_shared::PrincipalKind;

/// JWT claims of a back-office session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (staff or client id)
    pub sub: Uuid,
    /// Which table `sub` lives in
    pub kind: PrincipalKind,
    /// Staff role; absent for clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Identity decoded from a valid token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub principal_id: Uuid,
    pub kind: PrincipalKind,
    pub role: Option<String>,
}

/// Token verification seam used by the realtime layer and the HTTP middleware
pub trait TokenVerifier: Send + Sync {
    /// `None` for missing, malformed or expired tokens
    fn verify(&self, token: &str) -> Option<VerifiedIdentity>;
}

#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(
        &self,
        principal_id: Uuid,
        kind: PrincipalKind,
        role: Option<&str>,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: principal_id,
            kind,
            role: role.map(str::to_string),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Option<VerifiedIdentity> {
        match self.validate_token(token) {
            Ok(claims) => Some(VerifiedIdentity {
                principal_id: claims.sub,
                kind: claims.kind,
                role: claims.role,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Token rejected");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}
