//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::{error, info};

use crate::ServerConfig;
use crate::db::Database;
use crate::rate_limit::{
    DEFAULT_LOGIN_PER_MINUTE, DEFAULT_REGISTER_PER_MINUTE, DEFAULT_USER_WRITE_PER_MINUTE,
    RateLimits,
};
use crate::settings::{
    AuthSettings, DEFAULT_ACCESS_TTL_MINUTES, DEFAULT_REFRESH_TTL_DAYS, SameSite,
    SigningAlgorithm,
};

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Proxy header carrying the real client address.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// `X-Forwarded-For`, first entry
    XForwardedFor,
    XRealIp,
    /// Cloudflare
    CfConnectingIp,
}

impl ClientIpHeader {
    pub fn header_name(&self) -> &'static str {
        match self {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        }
    }

    /// Parse the client address out of this header's value.
    pub fn parse(&self, value: &str) -> Result<IpAddr, &'static str> {
        let candidate = match self {
            ClientIpHeader::XForwardedFor => value.split(',').next().unwrap_or_default(),
            ClientIpHeader::XRealIp | ClientIpHeader::CfConnectingIp => value,
        };
        candidate
            .trim()
            .parse()
            .map_err(|_| "IP header does not contain a valid address")
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gatehouse",
    about = "Cookie-based JWT session service with CSRF protection"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "gatehouse.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Token signing algorithm
    #[arg(long, env = "JWT_ALGORITHM", default_value = "HS256")]
    pub jwt_algorithm: SigningAlgorithm,

    /// Access token lifetime in minutes
    #[arg(long, env = "JWT_ACCESS_MINUTES", default_value_t = DEFAULT_ACCESS_TTL_MINUTES)]
    pub access_ttl_minutes: u64,

    /// Refresh token lifetime in days
    #[arg(long, env = "JWT_REFRESH_DAYS", default_value_t = DEFAULT_REFRESH_TTL_DAYS)]
    pub refresh_ttl_days: u64,

    /// Issue a new refresh token on every refresh
    #[arg(long, env = "JWT_ROTATE_REFRESH_TOKENS", default_value_t = true, action = ArgAction::Set)]
    pub rotate_refresh_tokens: bool,

    #[arg(long, env = "JWT_ACCESS_COOKIE_NAME", default_value = "access_token")]
    pub access_cookie_name: String,

    #[arg(long, env = "JWT_REFRESH_COOKIE_NAME", default_value = "refresh_token")]
    pub refresh_cookie_name: String,

    /// Set the Secure cookie attribute [default: true unless --debug]
    #[arg(long, env = "JWT_COOKIE_SECURE")]
    pub cookie_secure: Option<bool>,

    #[arg(long, env = "JWT_COOKIE_SAMESITE", default_value = "lax")]
    pub cookie_samesite: SameSite,

    /// Path the auth cookies are scoped to
    #[arg(long, env = "JWT_COOKIE_PATH", default_value = "/api/v1/")]
    pub cookie_path: String,

    #[arg(long, env = "CSRF_COOKIE_NAME", default_value = "csrftoken")]
    pub csrf_cookie_name: String,

    #[arg(long, env = "CSRF_HEADER_NAME", default_value = "X-CSRFToken")]
    pub csrf_header_name: String,

    /// Local development mode: cookies are not Secure by default
    #[arg(long, env = "APP_DEBUG")]
    pub debug: bool,

    /// Take the client IP from this proxy header instead of the socket address
    #[arg(long, env = "IP_HEADER")]
    pub ip_header: Option<ClientIpHeader>,

    /// Login attempts per minute per client IP
    #[arg(long, default_value_t = DEFAULT_LOGIN_PER_MINUTE)]
    pub login_rate: u32,

    /// Registrations per minute per client IP
    #[arg(long, default_value_t = DEFAULT_REGISTER_PER_MINUTE)]
    pub register_rate: u32,

    /// Account requests per minute per user
    #[arg(long, default_value_t = DEFAULT_USER_WRITE_PER_MINUTE)]
    pub user_write_rate: u32,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    /// Auth settings described by these arguments.
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            access_cookie_name: self.access_cookie_name.clone(),
            refresh_cookie_name: self.refresh_cookie_name.clone(),
            access_ttl: Duration::from_secs(self.access_ttl_minutes.saturating_mul(60)),
            refresh_ttl: Duration::from_secs(self.refresh_ttl_days.saturating_mul(24 * 60 * 60)),
            cookie_secure: self.cookie_secure.unwrap_or(!self.debug),
            cookie_samesite: self.cookie_samesite,
            cookie_path: self.cookie_path.clone(),
            csrf_cookie_name: self.csrf_cookie_name.clone(),
            csrf_header_name: self.csrf_header_name.clone(),
            algorithm: self.jwt_algorithm,
            rotate_refresh_tokens: self.rotate_refresh_tokens,
        }
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            login_per_minute: self.login_rate,
            register_per_minute: self.register_rate,
            user_write_per_minute: self.user_write_rate,
        }
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if let Err(e) = AuthSettings::validate_secret(secret.as_bytes()) {
        error!(error = %e, "Unusable JWT secret");
        return None;
    }

    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        settings: args.auth_settings(),
        rate_limits: args.rate_limits(),
        ip_header: args.ip_header,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
