use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::marketplace::domain::{User, UserId};
use crate::marketplace::ServiceError;

/// Refresh tokens outlive access tokens by this factor.
const REFRESH_MULTIPLIER: i64 = 24 * 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: UserId,
    pub kind: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<TokenError> for ServiceError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Expired | TokenError::Invalid => ServiceError::unauthorized(value.to_string()),
            TokenError::Signing(_) => ServiceError::Internal(value.to_string()),
        }
    }
}

/// Signs and verifies HS256 access/refresh tokens. Expiry is checked against
/// the injected clock rather than the system time.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_minutes: i64,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_minutes: i64::try_from(config.access_token_minutes).unwrap_or(i64::MAX),
            clock,
        }
    }

    pub fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.sign(user, TokenKind::Access, Some(self.access_minutes))?,
            refresh_token: self.sign(
                user,
                TokenKind::Refresh,
                self.access_minutes.checked_mul(REFRESH_MULTIPLIER),
            )?,
            token_type: "bearer",
        })
    }

    fn sign(
        &self,
        user: &User,
        kind: TokenKind,
        ttl_minutes: Option<i64>,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();
        let expires = ttl_minutes
            .and_then(Duration::try_minutes)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| TokenError::Signing("token lifetime is out of range".to_string()))?;
        let claims = Claims {
            sub: user.email.clone(),
            user_id: user.id,
            kind,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    /// Decode `token`, requiring it to be of `expected` kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)?;

        if claims.kind != expected {
            return Err(TokenError::Invalid);
        }
        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
