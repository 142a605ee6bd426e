//! Cookie parsing and the session cookie writer.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, header};

use crate::jwt::IssuedToken;
use crate::settings::{AuthSettings, SameSite};

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                if key.trim() == name {
                    return Some(value.trim());
                }
            }
        }
    }
    None
}

/// A single `Set-Cookie` value.
#[derive(Debug, Clone)]
pub struct SetCookie<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub path: &'a str,
    pub max_age: u64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl SetCookie<'_> {
    pub fn render(&self) -> String {
        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}",
            self.name, self.value, self.path, self.max_age
        );
        if self.max_age == 0 {
            cookie.push_str("; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.same_site.as_str());
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Append this cookie to response headers.
    pub fn append_to(&self, headers: &mut HeaderMap) {
        match HeaderValue::from_str(&self.render()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!(cookie = self.name, error = %e, "Invalid cookie value"),
        }
    }
}

/// Writes and clears the access/refresh cookie pair.
///
/// Set and delete share [`CookieSessionManager::cookie`], so a cleared cookie always carries
/// the same path and attributes it was written with.
#[derive(Clone)]
pub struct CookieSessionManager {
    settings: Arc<AuthSettings>,
}

impl CookieSessionManager {
    pub fn new(settings: Arc<AuthSettings>) -> Self {
        Self { settings }
    }

    fn cookie<'a>(&'a self, name: &'a str, value: &'a str, max_age: u64) -> SetCookie<'a> {
        SetCookie {
            name,
            value,
            path: &self.settings.cookie_path,
            max_age,
            http_only: true,
            secure: self.settings.cookie_secure,
            same_site: self.settings.cookie_samesite,
        }
    }

    /// Set the access cookie, and the refresh cookie when one was issued.
    pub fn write_session(
        &self,
        headers: &mut HeaderMap,
        access: &IssuedToken,
        refresh: Option<&IssuedToken>,
    ) {
        self.cookie(
            &self.settings.access_cookie_name,
            &access.token,
            self.settings.access_ttl_secs(),
        )
        .append_to(headers);

        if let Some(refresh) = refresh {
            self.cookie(
                &self.settings.refresh_cookie_name,
                &refresh.token,
                self.settings.refresh_ttl_secs(),
            )
            .append_to(headers);
        }
    }

    /// Delete both auth cookies.
    pub fn clear_session(&self, headers: &mut HeaderMap) {
        self.cookie(&self.settings.access_cookie_name, "", 0)
            .append_to(headers);
        self.cookie(&self.settings.refresh_cookie_name, "", 0)
            .append_to(headers);
    }

    /// Read the access token cookie, ignoring empty values.
    pub fn access_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        get_cookie(headers, &self.settings.access_cookie_name).filter(|v| !v.is_empty())
    }

    /// Read the refresh token cookie, ignoring empty values.
    pub fn refresh_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        get_cookie(headers, &self.settings.refresh_cookie_name).filter(|v| !v.is_empty())
    }
}
