//! Session lifecycle endpoints.
//!
//! - GET `/csrf/` - Set the CSRF cookie (204)
//! - POST `/token/` - Log in with username and password, set the auth cookies
//! - POST `/token/refresh/` - Exchange the refresh token for a new pair
//! - POST `/logout/` - Clear the auth cookies
//!
//! Login and refresh check CSRF in a layer before the handler runs. Logout goes through
//! `authenticate`, which checks CSRF itself once the session is known to be valid.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::ApiState;
use super::error::{ApiError, MALFORMED_BODY, ResultExt};
use crate::auth::{
    Auth, AuthError, AuthenticationFailure, AuthenticationResolver, CredentialStore,
    authenticate, require_csrf, verify_credentials,
};
use crate::jwt::{JwtError, TokenType, now_secs};
use crate::rate_limit::rate_limit_login;

pub fn router<C: CredentialStore>(
    state: ApiState<C>,
    authenticator: Arc<AuthenticationResolver<C>>,
) -> Router {
    let csrf = middleware::from_fn_with_state(state.csrf.clone(), require_csrf);

    Router::new()
        .route("/csrf/", get(csrf_cookie::<C>))
        .route(
            "/token/",
            post(login::<C>)
                .layer(csrf.clone())
                .layer(middleware::from_fn_with_state(
                    state.rate_limits.clone(),
                    rate_limit_login,
                )),
        )
        .route("/token/refresh/", post(refresh::<C>).layer(csrf))
        .route(
            "/logout/",
            post(logout::<C>).layer(middleware::from_fn_with_state(
                authenticator,
                authenticate::<AuthenticationResolver<C>>,
            )),
        )
        .with_state(state)
}

fn token_err(e: JwtError) -> ApiError {
    error!(error = %e, "Failed to issue token");
    ApiError::internal("Failed to generate token")
}

/// Hand out the CSRF cookie. Keeps an existing valid token.
async fn csrf_cookie<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut response_headers = HeaderMap::new();
    state.csrf.ensure_token_cookie(&headers, &mut response_headers);
    (StatusCode::NO_CONTENT, response_headers)
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn login<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let mut missing = serde_json::Map::new();
    for (field, value) in [("username", &payload.username), ("password", &payload.password)] {
        if value.is_empty() {
            missing.insert(field.to_string(), json!(["This field may not be blank."]));
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::Validation(missing.into()));
    }

    let user = verify_credentials(&state.credentials, &payload.username, &payload.password)
        .await
        .inspect_err(|e| {
            if *e == AuthError::CredentialsInvalid {
                warn!(username = %payload.username, "Failed login attempt");
            }
        })?;

    if let Err(e) = state.credentials.record_login(user.id).await {
        warn!(user_id = user.id, error = %e, "Failed to record last login");
    }

    let now = now_secs().map_err(token_err)?;
    let pair = state.codec.issue_pair(user.id, now).map_err(token_err)?;

    let mut response_headers = HeaderMap::new();
    state
        .sessions
        .write_session(&mut response_headers, &pair.access, Some(&pair.refresh));
    state.csrf.ensure_token_cookie(&headers, &mut response_headers);

    info!(user_id = user.id, "User logged in");

    Ok((
        response_headers,
        Json(json!({ "detail": "Login successful." })),
    )
        .into_response())
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh: Option<String>,
}

/// Refresh token from the body, for clients that do not keep cookies.
/// An empty body means "not provided"; anything else must be valid JSON.
fn refresh_from_body(body: &[u8]) -> Result<Option<String>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: RefreshRequest = serde_json::from_slice(body)
        .map_err(|_| ApiError::bad_request(MALFORMED_BODY))?;
    Ok(request.refresh.filter(|t| !t.is_empty()))
}

async fn refresh<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let token = match state.sessions.refresh_token(&headers) {
        Some(token) => token.to_string(),
        None => refresh_from_body(&body)?.ok_or(AuthError::RefreshTokenMissing)?,
    };

    let user_id = state
        .codec
        .validate(&token, TokenType::Refresh)
        .map_err(|e| {
            debug!(error = %e, "Rejected refresh token");
            AuthError::InvalidToken
        })?;

    let user = state
        .credentials
        .find_by_id(user_id)
        .await
        .db_err("Failed to get user")?
        .ok_or(AuthError::AuthenticationFailed(
            AuthenticationFailure::UserNotFound,
        ))?;

    if !user.is_active {
        return Err(AuthError::AuthenticationFailed(AuthenticationFailure::UserInactive).into());
    }

    let now = now_secs().map_err(token_err)?;
    let access = state.codec.issue_access(user.id, now).map_err(token_err)?;
    let refresh = if state.settings.rotate_refresh_tokens {
        Some(state.codec.issue_refresh(user.id, now).map_err(token_err)?)
    } else {
        None
    };

    let mut response_headers = HeaderMap::new();
    state
        .sessions
        .write_session(&mut response_headers, &access, refresh.as_ref());
    state.csrf.ensure_token_cookie(&headers, &mut response_headers);

    debug!(user_id = user.id, rotated = refresh.is_some(), "Session refreshed");

    Ok((
        response_headers,
        Json(json!({ "detail": "Token refreshed." })),
    )
        .into_response())
}

async fn logout<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    Auth(identity): Auth,
) -> impl IntoResponse {
    let mut response_headers = HeaderMap::new();
    state.sessions.clear_session(&mut response_headers);

    info!(user_id = identity.user_id, "User logged out");

    (response_headers, Json(json!({ "detail": "Logged out." })))
}
