//! Authentication error types.
//!
//! Every failure in the session core ends the request. This is the single place where an
//! error kind becomes a status code and a client-facing message.

use std::fmt;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::csrf::CsrfFailure;

/// Why a resolved token did not lead to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationFailure {
    UserNotFound,
    UserInactive,
}

impl AuthenticationFailure {
    fn message(&self) -> &'static str {
        match self {
            AuthenticationFailure::UserNotFound => "User not found.",
            AuthenticationFailure::UserInactive => "User inactive.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No credentials on an endpoint that needs an identity
    NotAuthenticated,
    /// Malformed, expired, tampered or wrong-type token
    InvalidToken,
    /// Valid token, but no matching active identity
    AuthenticationFailed(AuthenticationFailure),
    /// Bad username or password (never says which)
    CredentialsInvalid,
    RefreshTokenMissing,
    CsrfFailure(CsrfFailure),
    Internal,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::NotAuthenticated
            | AuthError::InvalidToken
            | AuthError::AuthenticationFailed(_)
            | AuthError::CredentialsInvalid
            | AuthError::RefreshTokenMissing => StatusCode::UNAUTHORIZED,
            AuthError::CsrfFailure(_) => StatusCode::FORBIDDEN,
            AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AuthError::NotAuthenticated => "Authentication credentials were not provided.".into(),
            AuthError::InvalidToken => "Token is invalid or expired.".into(),
            AuthError::AuthenticationFailed(failure) => failure.message().into(),
            AuthError::CredentialsInvalid => {
                "No active account found with the given credentials.".into()
            }
            AuthError::RefreshTokenMissing => "Refresh token not provided.".into(),
            AuthError::CsrfFailure(failure) => failure.to_string(),
            AuthError::Internal => "Internal server error.".into(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for AuthError {}

impl From<CsrfFailure> for AuthError {
    fn from(failure: CsrfFailure) -> Self {
        AuthError::CsrfFailure(failure)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (
            status,
            Json(ErrorResponse {
                detail: self.message(),
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"api\""),
            );
        }

        response
    }
}
