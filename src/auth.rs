//! Bearer token verification
//!
//! Tokens are issued by the hospital application, not by this service. We
//! only check the signature and expiry and read the caller's tenant from the
//! claims.

use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (user id in the issuing application)
    pub sub: String,
    /// Tenant the caller belongs to
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub role: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

/// Claims of the verified caller, if the request carried a token
#[derive(Debug, Clone, Default)]
pub struct Caller(pub Option<Claims>);

impl Caller {
    pub fn tenant_id(&self) -> Option<Uuid> {
        self.0.as_ref().and_then(|c| c.tenant_id)
    }

    /// Subject as an actor id for audit columns, when it is a UUID
    pub fn actor_id(&self) -> Option<Uuid> {
        self.0.as_ref().and_then(|c| Uuid::parse_str(&c.sub).ok())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(parts.extensions.get::<Claims>().cloned()))
    }
}

/// HMAC verifier for externally issued tokens
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Decode and validate a JWT token
    pub fn decode_token(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired".to_string()),
            ErrorKind::InvalidToken => AppError::Unauthorized("Invalid token".to_string()),
            _ => AppError::Unauthorized(format!("Token validation failed: {}", e)),
        })?;

        Ok(token_data.claims)
    }
}

/// Pull the token out of an `Authorization: Bearer ...` header value
fn bearer_token(header: &str) -> Result<&str, AppError> {
    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization header format".to_string()))
}

/// Claims of an `Authorization` header value. A missing header is only
/// rejected when authentication is `required`.
fn authorize(tokens: &TokenVerifier, header: Option<&str>, required: bool) -> Result<Option<Claims>, AppError> {
    match header {
        Some(header) => Ok(Some(tokens.decode_token(bearer_token(header)?)?)),
        None if required => Err(AppError::Unauthorized("Missing authorization header".to_string())),
        None => Ok(None),
    }
}

/// Verify the bearer token and store its claims in the request extensions
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if let Some(claims) = authorize(&state.tokens, header, state.settings.auth.required)? {
        request.extensions_mut().insert(claims);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use pretty_assertions::assert_eq;

    const SECRET: &str = "test-secret";

    fn token(claims: &Claims, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims(exp: i64) -> Claims {
        Claims {
            sub: "42".to_string(),
            tenant_id: Some(Uuid::new_v4()),
            role: Some("admin".to_string()),
            exp,
            iat: Utc::now().timestamp(),
        }
    }

    #[test]
    fn test_valid_token_yields_tenant() {
        let expected = claims((Utc::now() + Duration::minutes(15)).timestamp());
        let decoded = TokenVerifier::new(SECRET)
            .decode_token(&token(&expected, SECRET))
            .unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let expired = claims((Utc::now() - Duration::hours(2)).timestamp());
        match TokenVerifier::new(SECRET).decode_token(&token(&expired, SECRET)) {
            Err(AppError::Unauthorized(msg)) => assert_eq!(msg, "Token expired"),
            other => panic!("expected expiry rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let forged = claims((Utc::now() + Duration::minutes(15)).timestamp());
        let result = TokenVerifier::new(SECRET).decode_token(&token(&forged, "other-secret"));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc").unwrap(), "abc");
        assert!(bearer_token("Basic abc").is_err());
    }

    #[test]
    fn test_missing_header_rejected_when_required() {
        let tokens = TokenVerifier::new(SECRET);
        assert!(matches!(authorize(&tokens, None, true), Err(AppError::Unauthorized(_))));
        assert_eq!(authorize(&tokens, None, false).unwrap(), None);

        let valid = claims((Utc::now() + Duration::minutes(15)).timestamp());
        let header = format!("Bearer {}", token(&valid, SECRET));
        assert_eq!(authorize(&tokens, Some(&header), true).unwrap(), Some(valid));
        assert!(authorize(&tokens, Some("Bearer garbage"), false).is_err());
    }

    #[test]
    fn test_caller_actor_requires_uuid_subject() {
        let mut with_uuid = claims(0);
        let actor = Uuid::new_v4();
        with_uuid.sub = actor.to_string();
        assert_eq!(Caller(Some(with_uuid)).actor_id(), Some(actor));
        assert_eq!(Caller(Some(claims(0))).actor_id(), None);
        assert_eq!(Caller::default().tenant_id(), None);
    }

    #[test]
    fn test_tenant_claim_is_optional() {
        let raw = serde_json::json!({ "sub": "7", "exp": 1 });
        let claims: Claims = serde_json::from_value(raw).unwrap();
        assert_eq!(claims.tenant_id, None);
        assert_eq!(claims.iat, 0);
    }
}
