//! Rate limiting for authentication and account endpoints.
//!
//! Uses a keyed GCRA limiter (governor) so each client IP, or each signed-in user, gets its
//! own bucket. The middlewares below are the pre-handler interception point; swapping the
//! in-process limiter for a shared store only touches this module.

use std::{net::IpAddr, num::NonZeroU32, sync::Arc};

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use serde_json::json;
use tracing::warn;

use crate::auth::{Principal, extract_client_ip};
use crate::cli::ClientIpHeader;

/// Default login attempts per minute per IP.
pub const DEFAULT_LOGIN_PER_MINUTE: u32 = 10;
/// Default registrations per minute per IP.
pub const DEFAULT_REGISTER_PER_MINUTE: u32 = 10;
/// Default account requests per minute per user.
pub const DEFAULT_USER_WRITE_PER_MINUTE: u32 = 120;

/// Keyed limiter. Keys are `ip:<addr>` or `user:<id>`.
pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-minute quotas for each throttled scope.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub login_per_minute: u32,
    pub register_per_minute: u32,
    pub user_write_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login_per_minute: DEFAULT_LOGIN_PER_MINUTE,
            register_per_minute: DEFAULT_REGISTER_PER_MINUTE,
            user_write_per_minute: DEFAULT_USER_WRITE_PER_MINUTE,
        }
    }
}

/// Rate limiting state shared by the throttle middlewares.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for the login endpoint
    pub login: Arc<KeyedLimiter>,
    /// Per-IP limiter for registration
    pub register: Arc<KeyedLimiter>,
    /// Per-user limiter for account endpoints
    pub user_write: Arc<KeyedLimiter>,
    ip_header: Option<ClientIpHeader>,
}

impl RateLimitConfig {
    /// Build limiters from per-minute quotas. A quota of zero is treated as one.
    pub fn new(limits: &RateLimits, ip_header: Option<ClientIpHeader>) -> Self {
        Self {
            login: Arc::new(keyed(limits.login_per_minute)),
            register: Arc::new(keyed(limits.register_per_minute)),
            user_write: Arc::new(keyed(limits.user_write_per_minute)),
            ip_header,
        }
    }

    fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        extract_client_ip(request, self.ip_header).ok()
    }
}

fn keyed(per_minute: u32) -> KeyedLimiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    RateLimiter::keyed(Quota::per_minute(per_minute))
}

/// Take one cell from `key`'s bucket, or build the 429 response.
fn check(limiter: &KeyedLimiter, key: &String) -> Result<(), Response> {
    limiter.check_key(key).map_err(|not_until| {
        let wait = not_until.wait_time_from(limiter.clock().now());
        warn!(key = %key, "Request throttled");
        throttled(wait.as_secs().max(1))
    })
}

fn throttled(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "detail": "Request was throttled." })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn unknown_client() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "detail": "Unable to determine client IP." })),
    )
        .into_response()
}

async fn limit_by_ip(
    limiter: &KeyedLimiter,
    config: &RateLimitConfig,
    request: Request,
    next: Next,
) -> Response {
    let Some(ip) = config.client_ip(&request) else {
        return unknown_client();
    };

    match check(limiter, &format!("ip:{}", ip)) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit_by_ip(&config.login, &config, request, next).await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit_by_ip(&config.register, &config, request, next).await
}

/// Middleware for rate limiting account endpoints per signed-in user.
///
/// Must run after `authenticate`. Anonymous requests are bucketed by client IP instead,
/// then rejected by the handler's `Auth` extractor.
pub async fn rate_limit_user(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let user_id = request
        .extensions()
        .get::<Principal>()
        .and_then(Principal::identity)
        .map(|identity| identity.user_id);

    let key = match user_id {
        Some(user_id) => format!("user:{}", user_id),
        None => match config.client_ip(&request) {
            Some(ip) => format!("ip:{}", ip),
            None => return unknown_client(),
        },
    };

    match check(&config.user_write, &key) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}
