//! The signed-in user's own account.
//!
//! - GET `/me/` - Current profile
//! - PATCH `/me/` - Update email and display name (username is read-only)

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    routing::get,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use super::ApiState;
use super::error::{ApiError, ResultExt};
use super::register::{MAX_NAME_LENGTH, is_valid_email, normalize_email};
use crate::auth::{
    Auth, AuthError, AuthenticationFailure, AuthenticationResolver, CredentialStore, MaybeAuth,
    authenticate,
};
use crate::db::User;
use crate::rate_limit::rate_limit_user;

pub fn router<C: CredentialStore>(
    state: ApiState<C>,
    authenticator: Arc<AuthenticationResolver<C>>,
) -> Router {
    Router::new()
        .route(
            "/me/",
            get(get_me::<C>)
                .patch(update_me::<C>)
                .layer(middleware::from_fn_with_state(
                    state.rate_limits.clone(),
                    rate_limit_user,
                ))
                .layer(middleware::from_fn_with_state(
                    authenticator,
                    authenticate::<AuthenticationResolver<C>>,
                )),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct MeResponse {
    id: i64,
    username: String,
    email: Option<String>,
    display_name: String,
}

impl From<User> for MeResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
        }
    }
}

async fn load_user<C>(state: &ApiState<C>, user_id: i64) -> Result<User, ApiError> {
    state
        .db
        .users()
        .get_by_id(user_id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| AuthError::AuthenticationFailed(AuthenticationFailure::UserNotFound).into())
}

async fn get_me<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    MaybeAuth(identity): MaybeAuth,
) -> Result<Json<MeResponse>, ApiError> {
    let identity = identity.ok_or(AuthError::NotAuthenticated)?;
    let user = load_user(&state, identity.user_id).await?;
    Ok(Json(user.into()))
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct UpdateMeRequest {
    #[serde(default, deserialize_with = "present")]
    email: Option<Option<String>>,
    display_name: Option<String>,
}

async fn update_me<C: CredentialStore>(
    State(state): State<ApiState<C>>,
    Auth(identity): Auth,
    payload: Result<Json<UpdateMeRequest>, JsonRejection>,
) -> Result<Json<MeResponse>, ApiError> {
    let Json(payload) = payload?;
    let user = load_user(&state, identity.user_id).await?;

    let email = match payload.email {
        Some(email) => normalize_email(email),
        None => user.email.clone(),
    };

    if let Some(email) = email.as_deref() {
        if !is_valid_email(email) {
            return Err(ApiError::field(
                "email",
                vec!["Enter a valid email address.".to_string()],
            ));
        }
        if state
            .db
            .users()
            .is_email_taken_by_other(email, user.id)
            .await
            .db_err("Failed to check email")?
        {
            return Err(ApiError::field(
                "email",
                vec!["user with this email already exists.".to_string()],
            ));
        }
    }

    let display_name = match payload.display_name {
        Some(name) => name.trim().to_string(),
        None => user.display_name.clone(),
    };
    if display_name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::field(
            "display_name",
            vec![format!(
                "Ensure this field has no more than {} characters.",
                MAX_NAME_LENGTH
            )],
        ));
    }

    state
        .db
        .users()
        .update_profile(user.id, email.as_deref(), &display_name)
        .await
        .db_err("Failed to update user")?;

    Ok(Json(MeResponse {
        id: user.id,
        username: user.username,
        email,
        display_name,
    }))
}
