//! Bearer-token authentication for handlers.
//!
//! The router carries an `Arc<dyn ActorResolver>` as a request extension; the
//! [`Authenticated`] extractor reads the `Authorization` header and asks the
//! resolver who is calling.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::tokens::{TokenKind, TokenService};
use crate::marketplace::{Actor, ServiceError};
use crate::repository::Store;

/// Turns an access token into the calling actor.
pub trait ActorResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Result<Actor, ServiceError>;
}

pub type SharedResolver = Arc<dyn ActorResolver>;

/// Verifies access tokens and reloads the user, so a role change made after
/// the token was issued is seen on the next request.
pub struct TokenAuthenticator<S> {
    store: Arc<S>,
    tokens: Arc<TokenService>,
}

impl<S: Store> TokenAuthenticator<S> {
    pub fn new(store: Arc<S>, tokens: Arc<TokenService>) -> Self {
        Self { store, tokens }
    }
}

impl<S: Store> ActorResolver for TokenAuthenticator<S> {
    fn resolve(&self, token: &str) -> Result<Actor, ServiceError> {
        let claims = self.tokens.verify(token, TokenKind::Access)?;
        let user = self
            .store
            .read(|tx| tx.user(claims.user_id))?
            .ok_or_else(|| ServiceError::unauthorized("Invalid token"))?;
        Ok(Actor::new(user.id, user.role))
    }
}

/// The caller of an authenticated route.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub Actor);

#[axum::async_trait]
impl<St> FromRequestParts<St> for Authenticated
where
    St: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let resolver = parts
            .extensions
            .get::<SharedResolver>()
            .cloned()
            .ok_or_else(|| ServiceError::Internal("authentication is not configured".to_string()))?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::unauthorized("Not authenticated"))?;

        resolver.resolve(token).map(Authenticated)
    }
}
