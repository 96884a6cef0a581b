//! User authorization tokens.

use base64::prelude::*;

/// Message served when authorization is required but missing.
pub const MISSING_AUTH_MESSAGE: &str = "Authorization is required for this resource.";
/// Message served when the supplied authorization is not approved.
pub const INVALID_AUTH_MESSAGE: &str = "The supplied authorization is not approved.";

/// Form an HTTP Basic authorization value: `Basic <base64(username:password)>`.
pub fn basic_authorization(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    format!("Basic {}", BASE64_STANDARD.encode(credentials.as_bytes()))
}

/// Result of gating a request on its authorization token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// The request may proceed to rate limiting
    Accepted,
    /// Approved users only, and no token was supplied (401)
    Missing,
    /// Approved users only, and the token is not registered (403)
    Invalid,
}

impl AuthStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthStatus::Accepted)
    }

    /// HTTP status code this outcome maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthStatus::Accepted => 200,
            AuthStatus::Missing => 401,
            AuthStatus::Invalid => 403,
        }
    }

    /// Advisory body for a refused request, `None` when accepted.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            AuthStatus::Accepted => None,
            AuthStatus::Missing => Some(MISSING_AUTH_MESSAGE),
            AuthStatus::Invalid => Some(INVALID_AUTH_MESSAGE),
        }
    }
}
