//! Cookie-based JWT authentication with double-submit CSRF protection.
//!
//! Access and refresh tokens live in HttpOnly cookies scoped to the API root. Every
//! request passes through the [`authenticate`] middleware, which resolves a
//! [`Principal`] for the handler extractors; state-changing requests must also echo the
//! CSRF cookie in a header.

mod cookie;
mod credentials;
mod csrf;
mod errors;
mod extractors;
mod ip;
mod password;
mod resolver;
mod types;

pub use cookie::{CookieSessionManager, SetCookie, get_cookie};
pub use credentials::{CredentialStore, verify_credentials};
pub use csrf::{CsrfFailure, CsrfGuard, SAFE_METHODS, is_safe_method, require_csrf};
pub use errors::{AuthError, AuthenticationFailure};
pub use extractors::{Auth, MaybeAuth};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use password::{MIN_PASSWORD_LENGTH, hash_password, validate_password, verify_password};
pub use resolver::{AuthenticationResolver, Authenticator, authenticate};
pub use types::{Identity, Principal};
