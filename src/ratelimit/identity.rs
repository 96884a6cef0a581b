//! Identity resolution: what a request is counted against.

use std::borrow::Cow;
use std::fmt;

use super::behaviour::Behaviour;

/// Joins an endpoint owner and endpoint key into one storage key.
///
/// Unit separator, which cannot appear in an IP, a header value, or a route.
pub const ENDPOINT_KEY_SEPARATOR: char = '\u{1f}';

/// The kind of entity being rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Ip,
    User,
    Endpoint,
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityKind::Ip => "IP",
            IdentityKind::User => "User",
            IdentityKind::Endpoint => "Endpoint",
        };
        f.write_str(name)
    }
}

/// The entity a request is counted against.
///
/// Created fresh per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// A client address
    Ip(String),
    /// An authorization token
    User(String),
    /// A client address or token, scoped to one `VERB|resource` endpoint
    Endpoint { owner: String, endpoint: String },
}

impl Identity {
    /// Resolve the identity for a request, honouring priority
    /// endpoint > user > IP.
    ///
    /// Returns `None` when no configured scope applies, in which case the
    /// request is not rate limited.
    pub fn resolve(
        client_ip: &str,
        user_auth: &str,
        endpoint_key: &str,
        behaviour: &Behaviour,
    ) -> Option<Self> {
        let has_user = behaviour.limit_by_user && !user_auth.is_empty();

        if behaviour.limit_by_endpoint {
            let owner = if has_user {
                user_auth
            } else if behaviour.limit_by_ip {
                client_ip
            } else {
                ""
            };

            if owner.is_empty() {
                return None;
            }

            return Some(Identity::Endpoint {
                owner: owner.to_string(),
                endpoint: endpoint_key.to_string(),
            });
        }

        if has_user {
            return Some(Identity::User(user_auth.to_string()));
        }

        if behaviour.limit_by_ip {
            return Some(Identity::Ip(client_ip.to_string()));
        }

        None
    }

    /// The kind of this identity.
    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::Ip(_) => IdentityKind::Ip,
            Identity::User(_) => IdentityKind::User,
            Identity::Endpoint { .. } => IdentityKind::Endpoint,
        }
    }

    /// The IP, token, or endpoint owner.
    pub fn key(&self) -> &str {
        match self {
            Identity::Ip(ip) => ip,
            Identity::User(token) => token,
            Identity::Endpoint { owner, .. } => owner,
        }
    }

    /// The endpoint key, for endpoint-scoped identities.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Identity::Endpoint { endpoint, .. } => Some(endpoint.as_str()),
            _ => None,
        }
    }

    pub fn is_endpoint(&self) -> bool {
        matches!(self, Identity::Endpoint { .. })
    }

    /// The key this identity's attempts are stored under in its namespace.
    pub fn storage_key(&self) -> Cow<'_, str> {
        match self {
            Identity::Ip(ip) => Cow::Borrowed(ip.as_str()),
            Identity::User(token) => Cow::Borrowed(token.as_str()),
            Identity::Endpoint { owner, endpoint } => {
                Cow::Owned(format!("{}{}{}", owner, ENDPOINT_KEY_SEPARATOR, endpoint))
            }
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Endpoint { owner, endpoint } => {
                write!(f, "{} {} |{}|", self.kind(), owner, endpoint)
            }
            _ => write!(f, "{} {}", self.kind(), self.key()),
        }
    }
}

/// Form the canonical endpoint key `VERB|resource`.
///
/// The verb is expected upper-cased and the resource already reduced to a
/// route, without path arguments or a query string.
pub fn endpoint_key(verb: &str, resource: &str) -> String {
    format!("{}|{}", verb, resource)
}
