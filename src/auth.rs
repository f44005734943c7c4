//! Bearer-token extraction for handlers.
//!
//! Login, registration and token issuance live in the auth service; this
//! side only verifies the HS256 token and exposes the claims.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Extractor for the authenticated caller; rejects with 401 when the
/// `Authorization: Bearer` header is missing or the token does not verify.
#[derive(Debug)]
pub struct AuthUser(pub Claims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<Config>::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::MissingToken)?;
        let token = header.strip_prefix("Bearer ").ok_or(AppError::MissingToken)?;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AppError::InvalidToken)?;

        Ok(AuthUser(data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(role: Role) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            email: "user@example.com".into(),
            role,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        }
    }

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/orders");
        if let Some(value) = value {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn accepts_valid_bearer_token() {
        let config = Arc::new(Config::for_tests());
        let claims = claims(Role::User);
        let token = issue_token(&claims, &config.jwt_secret);

        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
        let AuthUser(decoded) = AuthUser::from_request_parts(&mut parts, &config)
            .await
            .unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert!(!decoded.is_admin());
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let config = Arc::new(Config::for_tests());
        let mut parts = parts_with_auth(None);
        let err = AuthUser::from_request_parts(&mut parts, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingToken));
    }

    #[tokio::test]
    async fn rejects_token_signed_with_other_secret() {
        let config = Arc::new(Config::for_tests());
        let token = issue_token(&claims(Role::Admin), "some-other-secret");

        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
        let err = AuthUser::from_request_parts(&mut parts, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let config = Arc::new(Config::for_tests());
        let mut expired = claims(Role::User);
        expired.exp = (chrono::Utc::now().timestamp() - 60) as usize;
        let token = issue_token(&expired, &config.jwt_secret);

        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
        let err = AuthUser::from_request_parts(&mut parts, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToken));
    }
}
