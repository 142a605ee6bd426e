//! Authentication settings, built once at startup and shared read-only.
//!
//! Every component of the session core (token codec, cookie writer, CSRF guard)
//! receives its policy from an [`AuthSettings`] value instead of looking it up globally.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::Algorithm;

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_MINUTES: u64 = 15;

/// Default refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL_DAYS: u64 = 7;

/// Longest accepted token lifetime: ten years.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// CSRF cookie lifetime: one year (52 weeks).
pub const CSRF_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 7 * 52;

/// The `SameSite` attribute applied to auth cookies.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Signing algorithms accepted for the process-wide secret.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    #[default]
    #[value(name = "HS256")]
    Hs256,
    #[value(name = "HS384")]
    Hs384,
    #[value(name = "HS512")]
    Hs512,
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::Hs256 => Algorithm::HS256,
            SigningAlgorithm::Hs384 => Algorithm::HS384,
            SigningAlgorithm::Hs512 => Algorithm::HS512,
        }
    }
}

/// Cookie, token lifetime and CSRF policy.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Set the `Secure` attribute (should be true everywhere except local development)
    pub cookie_secure: bool,
    pub cookie_samesite: SameSite,
    /// Path for the auth cookies, normally the API root
    pub cookie_path: String,
    pub csrf_cookie_name: String,
    pub csrf_header_name: String,
    pub algorithm: SigningAlgorithm,
    /// Issue a new refresh token on every refresh
    pub rotate_refresh_tokens: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_cookie_name: "access_token".to_string(),
            refresh_cookie_name: "refresh_token".to_string(),
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_MINUTES * 60),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_DAYS * 24 * 60 * 60),
            cookie_secure: true,
            cookie_samesite: SameSite::Lax,
            cookie_path: "/api/v1/".to_string(),
            csrf_cookie_name: "csrftoken".to_string(),
            csrf_header_name: "X-CSRFToken".to_string(),
            algorithm: SigningAlgorithm::Hs256,
            rotate_refresh_tokens: true,
        }
    }
}

impl AuthSettings {
    /// Check the settings for combinations that would silently break sessions.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.access_ttl.is_zero() || self.refresh_ttl.is_zero() {
            return Err(SettingsError::ZeroLifetime);
        }
        if self.access_ttl_secs() > MAX_TOKEN_LIFETIME_SECS
            || self.refresh_ttl_secs() > MAX_TOKEN_LIFETIME_SECS
        {
            return Err(SettingsError::LifetimeTooLong);
        }

        for name in [
            &self.access_cookie_name,
            &self.refresh_cookie_name,
            &self.csrf_cookie_name,
        ] {
            if !is_valid_cookie_name(name) {
                return Err(SettingsError::InvalidCookieName(name.clone()));
            }
        }

        if self.access_cookie_name == self.refresh_cookie_name
            || self.access_cookie_name == self.csrf_cookie_name
            || self.refresh_cookie_name == self.csrf_cookie_name
        {
            return Err(SettingsError::DuplicateCookieName);
        }

        if axum::http::HeaderName::from_bytes(self.csrf_header_name.as_bytes()).is_err() {
            return Err(SettingsError::InvalidHeaderName(
                self.csrf_header_name.clone(),
            ));
        }

        if !self.cookie_path.starts_with('/') || self.cookie_path.contains(';') {
            return Err(SettingsError::InvalidCookiePath(self.cookie_path.clone()));
        }

        // Browsers drop SameSite=None cookies that are not Secure.
        if self.cookie_samesite == SameSite::None && !self.cookie_secure {
            return Err(SettingsError::InsecureSameSiteNone);
        }

        Ok(())
    }

    /// Check a signing secret before any token is issued with it.
    pub fn validate_secret(secret: &[u8]) -> Result<(), SettingsError> {
        if secret.is_empty() {
            return Err(SettingsError::MissingSecret);
        }
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(SettingsError::WeakSecret);
        }
        Ok(())
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl.as_secs()
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl.as_secs()
    }
}

fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

/// Errors raised while validating [`AuthSettings`] at startup.
#[derive(Debug, PartialEq, Eq)]
pub enum SettingsError {
    ZeroLifetime,
    LifetimeTooLong,
    InvalidCookieName(String),
    DuplicateCookieName,
    InvalidHeaderName(String),
    InvalidCookiePath(String),
    InsecureSameSiteNone,
    MissingSecret,
    WeakSecret,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::ZeroLifetime => write!(f, "Token lifetimes must be greater than zero"),
            SettingsError::LifetimeTooLong => write!(
                f,
                "Token lifetimes must not exceed {} seconds",
                MAX_TOKEN_LIFETIME_SECS
            ),
            SettingsError::InvalidCookieName(name) => write!(f, "Invalid cookie name: {:?}", name),
            SettingsError::DuplicateCookieName => {
                write!(f, "Access, refresh and CSRF cookies need distinct names")
            }
            SettingsError::InvalidHeaderName(name) => write!(f, "Invalid header name: {:?}", name),
            SettingsError::InvalidCookiePath(path) => {
                write!(f, "Cookie path must start with '/': {:?}", path)
            }
            SettingsError::InsecureSameSiteNone => {
                write!(f, "SameSite=None requires secure cookies")
            }
            SettingsError::MissingSecret => write!(f, "No signing secret configured"),
            SettingsError::WeakSecret => write!(
                f,
                "Signing secret is shorter than {} bytes",
                MIN_SECRET_LENGTH
            ),
        }
    }
}

impl std::error::Error for SettingsError {}
