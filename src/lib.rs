pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod rate_limit;
pub mod settings;

use api::{ApiState, create_api_router};
use auth::{CookieSessionManager, CredentialStore, CsrfGuard};
use axum::Router;
use db::Database;
use jwt::TokenCodec;
use rate_limit::{RateLimitConfig, RateLimits};
use settings::{AuthSettings, SettingsError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Every route lives under this prefix.
pub const API_ROOT: &str = "/api/v1";

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Cookie, token and CSRF policy
    pub settings: AuthSettings,
    pub rate_limits: RateLimits,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_header: Option<cli::ClientIpHeader>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, SettingsError> {
    create_app_with_store(config, config.db.users())
}

/// Create the application router with a custom credential store.
///
/// Registration and profile endpoints still use `config.db`; login, refresh and request
/// authentication go through `credentials`.
pub fn create_app_with_store<C: CredentialStore>(
    config: &ServerConfig,
    credentials: C,
) -> Result<Router, SettingsError> {
    config.settings.validate()?;
    AuthSettings::validate_secret(&config.jwt_secret)?;

    let settings = Arc::new(config.settings.clone());
    let codec = Arc::new(TokenCodec::from_settings(&config.jwt_secret, &settings));

    let state = ApiState {
        db: config.db.clone(),
        credentials,
        codec,
        sessions: CookieSessionManager::new(settings.clone()),
        csrf: CsrfGuard::new(settings.clone())?,
        settings,
        rate_limits: Arc::new(RateLimitConfig::new(
            &config.rate_limits,
            config.ip_header,
        )),
    };

    Ok(Router::new().nest(API_ROOT, create_api_router(state)))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
