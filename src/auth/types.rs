//! Resolved caller identity.

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Database user ID
    pub user_id: i64,
    pub username: String,
    pub is_active: bool,
}

/// Outcome of resolving a request: a user, or nobody.
///
/// Inserted into request extensions by the `authenticate` middleware and read by the
/// `Auth` / `MaybeAuth` extractors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(Identity),
}

impl Principal {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Principal::Anonymous => None,
            Principal::User(identity) => Some(identity),
        }
    }
}
