//! Per-request identity resolution.
//!
//! Resolution order:
//! 1. no access cookie: anonymous
//! 2. cookie present but token invalid, expired or wrong type: 401
//! 3. token valid but user missing or inactive: 401
//! 4. unsafe method: CSRF must pass (403 otherwise)
//! 5. resolved identity
//!
//! CSRF runs only after authentication succeeds, so an expired session gets a 401 rather
//! than a misleading 403.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use super::cookie::CookieSessionManager;
use super::credentials::CredentialStore;
use super::csrf::{CsrfGuard, is_safe_method};
use super::errors::{AuthError, AuthenticationFailure};
use super::types::{Identity, Principal};
use crate::jwt::{TokenCodec, TokenType};

/// Turns an inbound request into a [`Principal`].
pub trait Authenticator: Send + Sync + 'static {
    fn resolve(&self, parts: &Parts) -> impl Future<Output = Result<Principal, AuthError>> + Send;
}

/// Cookie-token authenticator backed by a [`CredentialStore`].
pub struct AuthenticationResolver<C> {
    codec: Arc<TokenCodec>,
    sessions: CookieSessionManager,
    csrf: CsrfGuard,
    store: C,
}

impl<C: CredentialStore> AuthenticationResolver<C> {
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: CookieSessionManager,
        csrf: CsrfGuard,
        store: C,
    ) -> Self {
        Self {
            codec,
            sessions,
            csrf,
            store,
        }
    }
}

impl<C: CredentialStore> Authenticator for AuthenticationResolver<C> {
    async fn resolve(&self, parts: &Parts) -> Result<Principal, AuthError> {
        let Some(token) = self.sessions.access_token(&parts.headers) else {
            return Ok(Principal::Anonymous);
        };

        let user_id = self
            .codec
            .validate(token, TokenType::Access)
            .map_err(|e| {
                debug!(error = %e, "Rejected access token");
                AuthError::InvalidToken
            })?;

        let user = self
            .store
            .find_by_id(user_id)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "Failed to get user");
                AuthError::Internal
            })?
            .ok_or(AuthError::AuthenticationFailed(
                AuthenticationFailure::UserNotFound,
            ))?;

        if !user.is_active {
            return Err(AuthError::AuthenticationFailed(
                AuthenticationFailure::UserInactive,
            ));
        }

        if !is_safe_method(&parts.method) {
            self.csrf
                .enforce(&parts.method, &parts.headers)
                .map_err(|failure| {
                    debug!(user_id, reason = failure.reason(), "CSRF check failed");
                    AuthError::CsrfFailure(failure)
                })?;
        }

        Ok(Principal::User(Identity {
            user_id: user.id,
            username: user.username,
            is_active: user.is_active,
        }))
    }
}

/// Middleware resolving the caller before any handler runs.
///
/// Failures end the request here. On success the [`Principal`] is stored in request
/// extensions for the extractors.
pub async fn authenticate<A: Authenticator>(
    State(authenticator): State<Arc<A>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let principal = match authenticator.resolve(&parts).await {
        Ok(principal) => principal,
        Err(e) => return e.into_response(),
    };

    parts.extensions.insert(principal);
    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::csrf::CsrfFailure;
    use crate::db::{Database, NewUser, UserStore};
    use crate::jwt::now_secs;
    use crate::settings::AuthSettings;
    use axum::http::{HeaderValue, Method, header};

    struct Fixture {
        resolver: AuthenticationResolver<UserStore>,
        codec: Arc<TokenCodec>,
        db: Database,
        user_id: i64,
    }

    async fn fixture() -> Fixture {
        let settings = Arc::new(AuthSettings::default());
        let codec = Arc::new(TokenCodec::from_settings(b"resolver-test-secret", &settings));
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db
            .users()
            .create(&NewUser {
                username: "alice",
                email: None,
                display_name: "",
                password_hash: "unused",
            })
            .await
            .unwrap();

        let resolver = AuthenticationResolver::new(
            codec.clone(),
            CookieSessionManager::new(settings.clone()),
            CsrfGuard::new(settings).unwrap(),
            db.users(),
        );

        Fixture {
            resolver,
            codec,
            db,
            user_id,
        }
    }

    fn parts(method: Method, cookie: Option<String>, csrf_header: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri("/api/v1/users/me/");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        }
        if let Some(token) = csrf_header {
            builder = builder.header("x-csrftoken", token);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn access_token(fixture: &Fixture) -> String {
        fixture
            .codec
            .issue_access(fixture.user_id, now_secs().unwrap())
            .unwrap()
            .token
    }

    #[tokio::test]
    async fn test_no_cookie_is_anonymous() {
        let f = fixture().await;

        for method in [Method::GET, Method::POST] {
            let principal = f.resolver.resolve(&parts(method, None, None)).await.unwrap();
            assert_eq!(principal, Principal::Anonymous);
        }
    }

    #[tokio::test]
    async fn test_valid_token_on_safe_method() {
        let f = fixture().await;
        let cookie = format!("access_token={}", access_token(&f));

        let principal = f
            .resolver
            .resolve(&parts(Method::GET, Some(cookie), None))
            .await
            .unwrap();

        let identity = principal.identity().unwrap();
        assert_eq!(identity.user_id, f.user_id);
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn test_invalid_token_rejected_regardless_of_method() {
        let f = fixture().await;

        for method in [Method::GET, Method::POST] {
            let result = f
                .resolver
                .resolve(&parts(method, Some("access_token=garbage".into()), None))
                .await;
            assert_eq!(result, Err(AuthError::InvalidToken));
        }
    }

    #[tokio::test]
    async fn test_refresh_token_not_accepted_as_access() {
        let f = fixture().await;
        let refresh = f
            .codec
            .issue_refresh(f.user_id, now_secs().unwrap())
            .unwrap();
        let cookie = format!("access_token={}", refresh.token);

        let result = f
            .resolver
            .resolve(&parts(Method::GET, Some(cookie), None))
            .await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_missing_and_inactive_users_rejected() {
        let f = fixture().await;
        let cookie = format!("access_token={}", access_token(&f));

        f.db.users().set_active(f.user_id, false).await.unwrap();
        let result = f
            .resolver
            .resolve(&parts(Method::GET, Some(cookie.clone()), None))
            .await;
        assert_eq!(
            result,
            Err(AuthError::AuthenticationFailed(
                AuthenticationFailure::UserInactive
            ))
        );

        f.db.users().delete(f.user_id).await.unwrap();
        let result = f
            .resolver
            .resolve(&parts(Method::GET, Some(cookie), None))
            .await;
        assert_eq!(
            result,
            Err(AuthError::AuthenticationFailed(
                AuthenticationFailure::UserNotFound
            ))
        );
    }

    #[tokio::test]
    async fn test_unsafe_method_requires_csrf_after_authentication() {
        let f = fixture().await;
        let access = access_token(&f);
        let csrf = CsrfGuard::generate_token();

        let without_csrf = f
            .resolver
            .resolve(&parts(
                Method::POST,
                Some(format!("access_token={}", access)),
                None,
            ))
            .await;
        assert_eq!(
            without_csrf,
            Err(AuthError::CsrfFailure(CsrfFailure::CookieNotSet))
        );

        let with_csrf = f
            .resolver
            .resolve(&parts(
                Method::POST,
                Some(format!("access_token={}; csrftoken={}", access, csrf)),
                Some(&csrf),
            ))
            .await;
        assert!(with_csrf.unwrap().identity().is_some());
    }

    #[tokio::test]
    async fn test_expired_token_gets_401_not_403() {
        let f = fixture().await;
        let stale = f
            .codec
            .issue_access(f.user_id, now_secs().unwrap() - 60 * 60)
            .unwrap();

        let result = f
            .resolver
            .resolve(&parts(
                Method::POST,
                Some(format!("access_token={}", stale.token)),
                None,
            ))
            .await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }
}
