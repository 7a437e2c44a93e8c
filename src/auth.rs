//! Password hashing, signed session tokens and the `CurrentUser` extractor.
//!
//! Tokens are HS256 JWTs. Claims carry the member's role and effective permissions, so permission
//! checks never need a database round trip.

use std::collections::BTreeSet;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    http::AppState,
    models::{Role, TeamMember},
    permissions::{effective_permissions, Permission},
};

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub permissions: BTreeSet<Permission>,
    pub exp: i64,
}

#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn claims_for(&self, member: &TeamMember) -> Claims {
        Claims {
            sub: member.id,
            username: member.username.clone(),
            role: member.role,
            permissions: effective_permissions(member.role, &member.permissions),
            exp: (Utc::now() + self.ttl).timestamp(),
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, ApiError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("failed to sign session: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!("session token rejected: {e}");
                ApiError::Unauthenticated
            })?;
        Ok(data.claims)
    }

    pub fn session_cookie(&self, token: &str, secure: bool) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            self.ttl_seconds()
        );
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn clear_cookie(secure: bool) -> String {
        let mut cookie = format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0");
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }
    Ok(())
}

/// Pulls the session token from the cookie header, then from a bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub permissions: BTreeSet<Permission>,
}

impl CurrentUser {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.can(permission) {
            Ok(())
        } else {
            tracing::debug!(user = %self.username, %permission, "permission denied");
            Err(ApiError::Forbidden(permission))
        }
    }
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            username: claims.username,
            role: claims.role,
            permissions: claims.permissions,
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or(ApiError::Unauthenticated)?;
        let claims = state.signer.verify(&token)?;
        Ok(claims.into())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn claims(exp: i64) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            username: "dana".to_string(),
            role: Role::Agent,
            permissions: effective_permissions(Role::Agent, &[]),
            exp,
        }
    }

    #[test]
    fn signed_tokens_verify() {
        let signer = SessionSigner::new("a-long-test-secret-for-sessions-0001", 12);
        let original = claims(Utc::now().timestamp() + 600);
        let token = signer.sign(&original).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), original);
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let signer = SessionSigner::new("a-long-test-secret-for-sessions-0001", 12);
        let other = SessionSigner::new("a-different-secret-for-sessions-0002", 12);
        let token = signer.sign(&claims(Utc::now().timestamp() + 600)).unwrap();

        let mut forged = claims(Utc::now().timestamp() + 600);
        forged.role = Role::Admin;
        forged.permissions = Permission::ALL.iter().copied().collect();
        let forged = other.sign(&forged).unwrap();

        // Admin payload spliced under the agent token's signature.
        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

        assert!(matches!(signer.verify(&spliced), Err(ApiError::Unauthenticated)));
        assert!(matches!(signer.verify("garbage"), Err(ApiError::Unauthenticated)));
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let signer = SessionSigner::new("a-long-test-secret-for-sessions-0001", 12);
        let other = SessionSigner::new("a-different-secret-for-sessions-0002", 12);
        let token = other.sign(&claims(Utc::now().timestamp() + 600)).unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let signer = SessionSigner::new("a-long-test-secret-for-sessions-0001", 12);
        let token = signer.sign(&claims(Utc::now().timestamp() - 1)).unwrap();
        assert!(matches!(signer.verify(&token), Err(ApiError::Unauthenticated)));
    }

    #[test]
    fn token_is_read_from_cookie_or_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc.def.ghi"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz.123"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("xyz.123"));

        assert!(token_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn passwords_hash_and_verify() {
        let hash = bcrypt::hash("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn short_passwords_fail_validation() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn current_user_requires_permissions() {
        let user: CurrentUser = claims(0).into();
        assert!(user.require(Permission::ComplaintsCreate).is_ok());
        assert!(matches!(
            user.require(Permission::TeamManage),
            Err(ApiError::Forbidden(Permission::TeamManage))
        ));
    }

    #[test]
    fn cookies_carry_expected_attributes() {
        let signer = SessionSigner::new("a-long-test-secret-for-sessions-0001", 2);
        let cookie = signer.session_cookie("tok", true);
        assert!(cookie.starts_with("session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(cookie.ends_with("; Secure"));
        assert!(SessionSigner::clear_cookie(false).contains("Max-Age=0"));
    }
}
