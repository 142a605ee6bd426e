//! Account registration.
//!
//! Duplicate usernames or emails and malformed identity fields all produce the same
//! generic 400, so the endpoint cannot be used to enumerate accounts.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::ApiState;
use super::error::{ApiError, ResultExt};
use crate::auth::{CredentialStore, hash_password, validate_password};
use crate::db::NewUser;
use crate::rate_limit::rate_limit_register;

/// Longest accepted username and display name.
pub const MAX_NAME_LENGTH: usize = 150;

/// Longest accepted email address.
pub const MAX_EMAIL_LENGTH: usize = 254;

const GENERIC_FAILURE: &str = "Unable to register with provided credentials.";

pub fn router<C: CredentialStore>(state: ApiState<C>) -> Router {
    Router::new()
        .route(
            "/register/",
            post(register::<C>).layer(middleware::from_fn_with_state(
                state.rate_limits.clone(),
                rate_limit_register,
            )),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    username: String,
    email: Option<String>,
    password: Option<String>,
    #[serde(default)]
    display_name: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    id: i64,
    username: String,
    display_name: String,
}

/// Letters, digits and `@ . + - _`, 1 to 150 characters.
pub fn is_valid_username(username: &str) -> bool {
    let len = username.chars().count();
    (1..=MAX_NAME_LENGTH).contains(&len)
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

/// A deliberately loose shape check: one `@`, something before it, a dotted domain after it.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LENGTH || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Blank emails count as none.
pub(super) fn normalize_email(email: Option<String>) -> Option<String> {
    email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
}

async fn register<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let username = payload.username.trim();
    let email = normalize_email(payload.email);

    if !is_valid_username(username) || email.as_deref().is_some_and(|e| !is_valid_email(e)) {
        return Err(ApiError::bad_request(GENERIC_FAILURE));
    }

    let Some(password) = payload.password else {
        return Err(ApiError::field(
            "password",
            vec!["This field is required.".to_string()],
        ));
    };

    let users = state.db.users();
    if users
        .is_taken(username, email.as_deref())
        .await
        .db_err("Failed to check username availability")?
    {
        return Err(ApiError::bad_request(GENERIC_FAILURE));
    }

    let problems = validate_password(&password, username);
    if !problems.is_empty() {
        return Err(ApiError::field("password", problems));
    }

    let display_name = payload.display_name.trim();
    if display_name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::field(
            "display_name",
            vec![format!(
                "Ensure this field has no more than {} characters.",
                MAX_NAME_LENGTH
            )],
        ));
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            error!(error = %e, "Password hashing task failed");
            ApiError::internal("Failed to create user")
        })?
        .map_err(|e| {
            error!(error = %e, "Failed to hash password");
            ApiError::internal("Failed to create user")
        })?;

    let created = users
        .create(&NewUser {
            username,
            email: email.as_deref(),
            display_name,
            password_hash: &password_hash,
        })
        .await;

    let id = match created {
        Ok(id) => id,
        // Lost a race with a concurrent registration
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(ApiError::bad_request(GENERIC_FAILURE));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    };

    info!(user_id = id, username = %username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id,
            username: username.to_string(),
            display_name: display_name.to_string(),
        }),
    ))
}
