//! Double-submit cookie CSRF protection.
//!
//! The CSRF cookie is readable by page scripts, which echo it back in a request header.
//! A cross-site attacker can make the browser send the cookie but cannot read it, so cannot
//! produce the matching header.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use tracing::debug;

use super::cookie::{SetCookie, get_cookie};
use super::errors::AuthError;
use crate::settings::{AuthSettings, CSRF_COOKIE_MAX_AGE_SECS, SettingsError};

/// Random bytes per CSRF token.
const TOKEN_BYTES: usize = 32;

/// Encoded token length (base64url, no padding).
const TOKEN_LENGTH: usize = 43;

/// Methods defined to have no side effects. CSRF is never enforced on these.
pub const SAFE_METHODS: [Method; 4] = [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE];

pub fn is_safe_method(method: &Method) -> bool {
    SAFE_METHODS.contains(method)
}

/// Why a state-changing request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    CookieNotSet,
    TokenMissing,
    TokenIncorrect,
}

impl CsrfFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfFailure::CookieNotSet => "CSRF cookie not set.",
            CsrfFailure::TokenMissing => "CSRF token missing.",
            CsrfFailure::TokenIncorrect => "CSRF token incorrect.",
        }
    }
}

impl fmt::Display for CsrfFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CSRF Failed: {}", self.reason())
    }
}

impl std::error::Error for CsrfFailure {}

/// Issues the CSRF cookie and checks the echoed header.
#[derive(Clone)]
pub struct CsrfGuard {
    settings: Arc<AuthSettings>,
    header_name: HeaderName,
}

impl CsrfGuard {
    pub fn new(settings: Arc<AuthSettings>) -> Result<Self, SettingsError> {
        let header_name = HeaderName::from_bytes(settings.csrf_header_name.as_bytes())
            .map_err(|_| SettingsError::InvalidHeaderName(settings.csrf_header_name.clone()))?;
        Ok(Self {
            settings,
            header_name,
        })
    }

    /// Generate a fresh random token.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// The CSRF cookie on the request, if present and well formed.
    pub fn current_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        get_cookie(headers, &self.settings.csrf_cookie_name).filter(|t| is_well_formed(t))
    }

    /// Set the CSRF cookie on the response, keeping the request's token when it has one.
    /// Returns the token value now held by the client.
    pub fn ensure_token_cookie(
        &self,
        request_headers: &HeaderMap,
        response_headers: &mut HeaderMap,
    ) -> String {
        let token = match self.current_token(request_headers) {
            Some(existing) => existing.to_string(),
            None => Self::generate_token(),
        };

        SetCookie {
            name: &self.settings.csrf_cookie_name,
            value: &token,
            path: "/",
            max_age: CSRF_COOKIE_MAX_AGE_SECS,
            http_only: false,
            secure: self.settings.cookie_secure,
            same_site: self.settings.cookie_samesite,
        }
        .append_to(response_headers);

        token
    }

    /// Require the CSRF header to match the CSRF cookie on unsafe methods.
    pub fn enforce(&self, method: &Method, headers: &HeaderMap) -> Result<(), CsrfFailure> {
        if is_safe_method(method) {
            return Ok(());
        }

        let cookie = self
            .current_token(headers)
            .ok_or(CsrfFailure::CookieNotSet)?;

        let header = headers
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(CsrfFailure::TokenMissing)?;

        if !constant_time_eq(cookie.as_bytes(), header.as_bytes()) {
            return Err(CsrfFailure::TokenIncorrect);
        }

        Ok(())
    }
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware rejecting unsafe requests without a valid CSRF header.
///
/// Runs before the handler parses the body, so no business logic sees a forged request.
pub async fn require_csrf(
    State(guard): State<CsrfGuard>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(failure) = guard.enforce(request.method(), request.headers()) {
        debug!(reason = failure.reason(), path = %request.uri().path(), "CSRF check failed");
        return AuthError::CsrfFailure(failure).into_response();
    }
    next.run(request).await
}
