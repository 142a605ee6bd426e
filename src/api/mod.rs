mod error;
mod health;
mod register;
mod session;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::auth::{AuthenticationResolver, CookieSessionManager, CredentialStore, CsrfGuard};
use crate::db::Database;
use crate::jwt::TokenCodec;
use crate::rate_limit::RateLimitConfig;
use crate::settings::AuthSettings;

pub use error::{ApiError, ResultExt};

/// Everything the API handlers share. Built once at startup.
#[derive(Clone)]
pub struct ApiState<C> {
    pub db: Database,
    pub credentials: C,
    pub codec: Arc<TokenCodec>,
    pub sessions: CookieSessionManager,
    pub csrf: CsrfGuard,
    pub settings: Arc<AuthSettings>,
    pub rate_limits: Arc<RateLimitConfig>,
}

impl<C: CredentialStore> ApiState<C> {
    fn authenticator(&self) -> Arc<AuthenticationResolver<C>> {
        Arc::new(AuthenticationResolver::new(
            self.codec.clone(),
            self.sessions.clone(),
            self.csrf.clone(),
            self.credentials.clone(),
        ))
    }
}

/// Create the API router.
pub fn create_api_router<C: CredentialStore>(state: ApiState<C>) -> Router {
    let authenticator = state.authenticator();

    Router::new()
        .nest(
            "/auth",
            session::router(state.clone(), authenticator.clone())
                .merge(register::router(state.clone())),
        )
        .nest("/users", users::router(state.clone(), authenticator))
        .merge(health::router(state.db))
}
