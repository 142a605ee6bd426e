//! Axum extractors for the principal resolved by [`authenticate`](super::authenticate).

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::AuthError;
use super::types::{Identity, Principal};

/// Extractor for endpoints that require a signed-in user.
///
/// Anonymous callers get a 401. The route must sit behind the `authenticate` middleware.
pub struct Auth(pub Identity);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(Principal::User(identity)) => Ok(Auth(identity.clone())),
            Some(Principal::Anonymous) => Err(AuthError::NotAuthenticated),
            None => {
                tracing::error!(path = %parts.uri.path(), "Route is missing the authenticate layer");
                Err(AuthError::Internal)
            }
        }
    }
}

/// Optional authentication extractor - never fails.
pub struct MaybeAuth(pub Option<Identity>);

impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Principal>()
            .and_then(Principal::identity)
            .cloned();
        Ok(MaybeAuth(identity))
    }
}
