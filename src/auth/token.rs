use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::config::SecurityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub exp: i64,
    pub iat: i64,
}

/// Mints and validates access and refresh tokens; each kind has its own secret
#[derive(Clone)]
pub struct TokenService {
    access_secret: String,
    refresh_secret: String,
    access_days: i64,
    refresh_days: i64,
}

impl TokenService {
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        access_days: i64,
        refresh_days: i64,
    ) -> Result<Self, AuthError> {
        let access_secret = access_secret.into();
        let refresh_secret = refresh_secret.into();
        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(AuthError::Configuration("JWT_SECRET and JWT_REFRESH_SECRET must be set".to_string()));
        }
        if access_secret == refresh_secret {
            return Err(AuthError::Configuration(
                "JWT_SECRET and JWT_REFRESH_SECRET must differ".to_string(),
            ));
        }
        Ok(Self {
            access_secret,
            refresh_secret,
            access_days,
            refresh_days,
        })
    }

    pub fn from_config(security: &SecurityConfig) -> Result<Self, AuthError> {
        Self::new(
            security.jwt_secret.clone(),
            security.jwt_refresh_secret.clone(),
            security.access_token_days,
            security.refresh_token_days,
        )
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_days * 24 * 3600
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        self.issue(user_id, TokenType::Access, Duration::days(self.access_days), &self.access_secret)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        self.issue(user_id, TokenType::Refresh, Duration::days(self.refresh_days), &self.refresh_secret)
    }

    pub fn decode_access(&self, token: &str) -> Result<Claims, AuthError> {
        Self::decode_kind(token, TokenType::Access, &self.access_secret)
    }

    pub fn decode_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        Self::decode_kind(token, TokenType::Refresh, &self.refresh_secret)
    }

    fn issue(&self, user_id: Uuid, token_type: TokenType, ttl: Duration, secret: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            token_type,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .map_err(|e| AuthError::Configuration(format!("JWT generation error: {}", e)))
    }

    fn decode_kind(token: &str, expected: TokenType, secret: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(format!("Invalid token: {}", e)),
            })?;

        if data.claims.token_type != expected {
            return Err(AuthError::InvalidToken("Invalid token type".to_string()));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("access-secret", "refresh-secret", 7, 30).unwrap()
    }

    #[test]
    fn access_token_carries_user_and_seven_day_expiry() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let claims = svc.decode_access(&svc.issue_access_token(user_id).unwrap()).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.token_type, TokenType::Access);
        let days = (claims.exp - claims.iat) / 86_400;
        assert_eq!(days, 7);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = service();
        let refresh = svc.issue_refresh_token(Uuid::new_v4()).unwrap();
        assert!(matches!(svc.decode_access(&refresh), Err(AuthError::InvalidToken(_))));
        let claims = svc.decode_refresh(&refresh).unwrap();
        assert_eq!((claims.exp - claims.iat) / 86_400, 30);
    }

    #[test]
    fn access_token_is_not_a_refresh_token() {
        let svc = service();
        let access = svc.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(svc.decode_refresh(&access).is_err());
    }

    #[test]
    fn expired_tokens_fail_closed() {
        let svc = TokenService::new("access-secret", "refresh-secret", -1, 30).unwrap();
        let token = svc.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(matches!(svc.decode_access(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let svc = service();
        let other = TokenService::new("other-access", "other-refresh", 7, 30).unwrap();
        let token = other.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(matches!(svc.decode_access(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn shared_secret_is_a_configuration_error() {
        assert!(TokenService::new("same", "same", 7, 30).is_err());
        assert!(TokenService::new("", "x", 7, 30).is_err());
    }
}
