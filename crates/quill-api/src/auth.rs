use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Verifies HS256 access tokens signed with the shared `JWT_SECRET`
#[derive(Clone)]
pub struct JwtVerifier {
    key: Arc<DecodingKey>,
    clock_skew: Duration,
}

impl JwtVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(config.jwt_secret.as_bytes())),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let decoded = decode::<AccessClaims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;
        let claims = decoded.claims;

        if claims.token_type.as_deref() != Some(ACCESS_TOKEN_TYPE) {
            return Err(AppError::unauthorized("Token is not an access token"));
        }
        if claims.user_id.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        validate_temporal_claims(&claims, self.clock_skew)?;

        Ok(AuthenticatedUser {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

/// Stable, non-reversible label for an account in logs
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessClaims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type", default)]
    pub token_type: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

fn validate_temporal_claims(claims: &AccessClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    pub(crate) const TEST_SECRET: &str = "test-signing-secret-0123456789";

    pub(crate) fn sign(claims: &AccessClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    pub(crate) fn access_claims(user_id: &str) -> AccessClaims {
        let now = chrono::Utc::now().timestamp();
        AccessClaims {
            user_id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
            role: Some("user".to_string()),
            token_type: Some(ACCESS_TOKEN_TYPE.to_string()),
            exp: Some(now + 900),
            iat: Some(now),
            nbf: None,
        }
    }

    pub(crate) fn access_token(user_id: &str) -> String {
        sign(&access_claims(user_id), TEST_SECRET)
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier {
            key: Arc::new(DecodingKey::from_secret(TEST_SECRET.as_bytes())),
            clock_skew: Duration::from_secs(60),
        }
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn verifier_accepts_access_token() {
        let user = verifier().verify_access_token(&access_token("u1")).unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.email.as_deref(), Some("u1@example.com"));
    }

    #[test]
    fn verifier_rejects_refresh_token() {
        let mut claims = access_claims("u1");
        claims.token_type = Some("refresh".to_string());
        let err = verifier()
            .verify_access_token(&sign(&claims, TEST_SECRET))
            .unwrap_err();
        assert!(err.to_string().contains("not an access token"));
    }

    #[test]
    fn verifier_rejects_foreign_signature() {
        let token = sign(&access_claims("u1"), "some-other-secret-value");
        assert!(verifier().verify_access_token(&token).is_err());
    }

    #[test]
    fn temporal_claims_require_exp_and_iat() {
        let mut claims = access_claims("u1");
        claims.exp = None;
        let err = validate_temporal_claims(&claims, Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_expired_and_future_tokens() {
        let now = chrono::Utc::now().timestamp();

        let mut expired = access_claims("u1");
        expired.exp = Some(now - 120);
        let err = validate_temporal_claims(&expired, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("expired"));

        let mut future = access_claims("u1");
        future.iat = Some(now + 120);
        let err = validate_temporal_claims(&future, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }
}
