//! The user record store seen by the session core.

use std::future::Future;

use tracing::error;

use super::errors::AuthError;
use super::password::{dummy_verify, verify_password};
use crate::db::{User, UserStore};

/// Lookup operations the session core needs from the user store.
///
/// Uniqueness and consistency of the records are the store's own business.
pub trait CredentialStore: Clone + Send + Sync + 'static {
    fn find_by_id(&self, id: i64)
    -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;

    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;

    /// Note a successful login.
    fn record_login(&self, id: i64) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl CredentialStore for UserStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        self.get_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        self.get_by_username(username).await
    }

    async fn record_login(&self, id: i64) -> Result<(), sqlx::Error> {
        UserStore::record_login(self, id).await
    }
}

/// Check a username/password pair and return the matching active user.
///
/// Unknown users, wrong passwords and inactive accounts all yield
/// [`AuthError::CredentialsInvalid`].
pub async fn verify_credentials<C: CredentialStore>(
    store: &C,
    username: &str,
    password: &str,
) -> Result<User, AuthError> {
    let user = store.find_by_username(username).await.map_err(|e| {
        error!(error = %e, "Failed to look up user");
        AuthError::Internal
    })?;

    let password = password.to_string();
    let Some(user) = user else {
        tokio::task::spawn_blocking(move || dummy_verify(&password))
            .await
            .map_err(|_| AuthError::Internal)?;
        return Err(AuthError::CredentialsInvalid);
    };

    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| {
            error!(error = %e, "Password verification task failed");
            AuthError::Internal
        })?;

    if !matches || !user.is_active {
        return Err(AuthError::CredentialsInvalid);
    }

    Ok(user)
}
