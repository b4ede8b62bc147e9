//! Bearer-token verification.
//!
//! Production deployments own the real verification policy (JWKS fetch,
//! org-specific claims) — that choice is deliberately external. This module
//! ships a minimal, real `TokenVerifier` so the binary authenticates requests
//! rather than trusting an unchecked header: HS256 JWTs carrying `sub`
//! (subject id), `kind` (`user`|`admin`), and `roles`.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::domain::{ParticipantKind, Principal};
use crate::error::Error;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    kind: ParticipantKind,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = json!({ "error": "unauthorized", "detail": self.to_string() });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Principal {
            kind: data.claims.kind,
            subject_id: data.claims.sub,
            roles: data.claims.roles,
        })
    }
}

/// `CurrentPrincipal` — an Axum extractor pulling a `Bearer` token out of
/// the `Authorization` header and verifying it, the way the Python routers'
/// `CurrentPrincipal` dependency does.
pub struct CurrentPrincipal(pub Principal);

/// `CurrentAdmin` — same as `CurrentPrincipal`, but rejects non-admin callers.
pub struct CurrentAdmin(pub Principal);

/// An authenticated caller can still lack the role a route requires: that's
/// `Forbidden` (403), distinct from an invalid/missing token (`AuthError`,
/// 401), matching the NotFound/Forbidden/Validation/auth split in spec §6.
#[derive(Debug, thiserror::Error)]
pub enum AdminRejection {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Forbidden(#[from] Error),
}

impl IntoResponse for AdminRejection {
    fn into_response(self) -> Response {
        match self {
            AdminRejection::Auth(e) => e.into_response(),
            AdminRejection::Forbidden(e) => e.into_response(),
        }
    }
}

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    TokenVerifier: FromRef<S>,
    S: Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = TokenVerifier::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AuthError::InvalidToken("missing Authorization header".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthError::InvalidToken("expected a Bearer token".to_string()))?;
        Ok(CurrentPrincipal(verifier.verify(token)?))
    }
}

impl<S> FromRequestParts<S> for CurrentAdmin
where
    TokenVerifier: FromRef<S>,
    S: Sync,
{
    type Rejection = AdminRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentPrincipal(principal) = CurrentPrincipal::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(Error::Forbidden("admin access required".to_string()).into());
        }
        Ok(CurrentAdmin(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn round_trips_a_valid_token() {
        let secret = "test-secret";
        let claims = Claims {
            sub: 42,
            kind: ParticipantKind::User,
            roles: vec![],
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();

        let verifier = TokenVerifier::new(secret);
        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal.subject_id, 42);
        assert_eq!(principal.kind, ParticipantKind::User);
        assert!(!principal.is_admin());
    }

    #[test]
    fn rejects_a_token_signed_with_the_wrong_secret() {
        let claims = Claims {
            sub: 1,
            kind: ParticipantKind::Admin,
            roles: vec!["admin".to_string()],
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"wrong")).unwrap();

        let verifier = TokenVerifier::new("right");
        assert!(verifier.verify(&token).is_err());
    }
}
