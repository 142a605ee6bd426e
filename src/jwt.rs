//! Signed access and refresh tokens.
//!
//! Both token kinds share one claim set and differ by `typ` and lifetime. Neither is tracked
//! server-side: a token stays valid until `exp` and cannot be revoked earlier.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::settings::AuthSettings;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived token presented on every API call
    Access,
    /// Long-lived token used only to mint new access tokens
    Refresh,
}

/// JWT claims carried by both token types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id, as a decimal string)
    pub sub: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Unique token id, changes on every issue so rotated tokens never repeat
    pub jti: String,
}

impl Claims {
    /// Parse the subject back into a user id.
    pub fn subject_id(&self) -> Result<i64, JwtError> {
        self.sub.parse().map_err(|_| JwtError::InvalidSubject)
    }
}

/// A freshly signed token and its timing.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds, used as the cookie Max-Age
    pub duration: u64,
}

/// Access and refresh token issued together on login or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Issues and validates tokens with the process-wide secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// Create a codec signing with `secret`.
    pub fn new(
        secret: &[u8],
        algorithm: Algorithm,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Create a codec using the algorithm and lifetimes from `settings`.
    pub fn from_settings(secret: &[u8], settings: &AuthSettings) -> Self {
        Self::new(
            secret,
            settings.algorithm.into(),
            settings.access_ttl,
            settings.refresh_ttl,
        )
    }

    /// Issue an access token for `subject_id`, valid from `now` for the access lifetime.
    pub fn issue_access(&self, subject_id: i64, now: u64) -> Result<IssuedToken, JwtError> {
        self.issue(subject_id, TokenType::Access, now, self.access_ttl.as_secs())
    }

    /// Issue a refresh token for `subject_id`, valid from `now` for the refresh lifetime.
    pub fn issue_refresh(&self, subject_id: i64, now: u64) -> Result<IssuedToken, JwtError> {
        self.issue(subject_id, TokenType::Refresh, now, self.refresh_ttl.as_secs())
    }

    /// Issue both tokens at once.
    pub fn issue_pair(&self, subject_id: i64, now: u64) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access: self.issue_access(subject_id, now)?,
            refresh: self.issue_refresh(subject_id, now)?,
        })
    }

    fn issue(
        &self,
        subject_id: i64,
        token_type: TokenType,
        now: u64,
        duration: u64,
    ) -> Result<IssuedToken, JwtError> {
        let jti = uuid::Uuid::new_v4().simple().to_string();
        let exp = now.checked_add(duration).ok_or(JwtError::ExpiryOverflow)?;

        let claims = Claims {
            sub: subject_id.to_string(),
            token_type,
            iat: now,
            exp,
            jti: jti.clone(),
        };

        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            duration,
        })
    }

    /// Validate `token` as `expected` at the current time and return its subject id.
    pub fn validate(&self, token: &str, expected: TokenType) -> Result<i64, JwtError> {
        self.validate_at(token, expected, now_secs()?)?.subject_id()
    }

    /// Validate `token` as `expected` at time `now` and return its claims.
    ///
    /// A token is expired once `now >= exp`.
    pub fn validate_at(
        &self,
        token: &str,
        expected: TokenType,
        now: u64,
    ) -> Result<Claims, JwtError> {
        // Expiry is checked below against the caller's clock.
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(JwtError::Decoding)?;
        let claims = token_data.claims;

        if claims.token_type != expected {
            return Err(JwtError::WrongTokenType);
        }

        if now >= claims.exp {
            return Err(JwtError::Expired);
        }

        claims.subject_id()?;
        Ok(claims)
    }
}

/// Current Unix time in whole seconds.
pub fn now_secs() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Malformed token or bad signature
    Decoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
    Expired,
    /// Issue time plus lifetime does not fit in a timestamp
    ExpiryOverflow,
    /// Subject is not a user id
    InvalidSubject,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
            JwtError::Expired => write!(f, "Token has expired"),
            JwtError::ExpiryOverflow => write!(f, "Token expiry overflows"),
            JwtError::InvalidSubject => write!(f, "Token subject is not a user id"),
        }
    }
}

impl std::error::Error for JwtError {}
