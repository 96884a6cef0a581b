//! Rate limiting behaviour: how many attempts, over what window, and which
//! scopes are active.

use chrono::TimeDelta;
use tracing::warn;

use crate::error::{Result, TurnstileError};

/// Default number of attempts allowed per window.
pub const DEFAULT_REQUEST_LIMIT: u32 = 100;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 3600;

/// Longest window a timestamp delta can represent.
pub const MAX_WINDOW_SECONDS: u64 = (i64::MAX / 1000) as u64;

/// Immutable configuration for a [`RateLimiter`](super::RateLimiter).
///
/// Set once at construction. Scopes are resolved in priority
/// endpoint > user > IP; see [`Identity::resolve`](super::Identity::resolve).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Behaviour {
    /// Attempts admitted per window. Zero rejects everything.
    pub request_limit: u32,
    /// Trailing window length in seconds.
    pub window_seconds: u64,
    /// Whether the hostile-IP registry is consulted at all
    pub store_hostile_ips: bool,
    /// Limit by client IP
    pub limit_by_ip: bool,
    /// Limit by user authorization token
    pub limit_by_user: bool,
    /// Scope the chosen owner to the requested endpoint
    pub limit_by_endpoint: bool,
    /// Only accept tokens that were registered beforehand
    pub approved_users_only: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            request_limit: DEFAULT_REQUEST_LIMIT,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            store_hostile_ips: false,
            limit_by_ip: false,
            limit_by_user: true,
            limit_by_endpoint: true,
            approved_users_only: false,
        }
    }
}

impl Behaviour {
    /// Create a behaviour with the given limit and window, default scopes.
    pub fn new(request_limit: u32, window_seconds: u64) -> Self {
        Self {
            request_limit,
            window_seconds,
            ..Self::default()
        }
    }

    /// Check that the engine can run with this behaviour.
    pub fn validate(&self) -> Result<()> {
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(TurnstileError::InvalidConfiguration {
                field: "window_seconds",
                reason: format!(
                    "must be at most {}, got {}",
                    MAX_WINDOW_SECONDS, self.window_seconds
                ),
            });
        }

        if self.request_limit == 0 {
            warn!("request_limit is 0, every attempt will be rejected");
        }

        if !self.has_scope() {
            warn!("No rate limiting scope enabled, no request will be limited");
        }

        Ok(())
    }

    /// The window as a timestamp delta.
    pub fn window(&self) -> TimeDelta {
        i64::try_from(self.window_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Whether any identity can be resolved at all.
    pub fn has_scope(&self) -> bool {
        self.limit_by_ip || self.limit_by_user || self.limit_by_endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_behaviour() {
        let behaviour = Behaviour::default();
        assert_eq!(behaviour.request_limit, 100);
        assert_eq!(behaviour.window_seconds, 3600);
        assert!(!behaviour.store_hostile_ips);
        assert!(!behaviour.limit_by_ip);
        assert!(behaviour.limit_by_user);
        assert!(behaviour.limit_by_endpoint);
        assert!(!behaviour.approved_users_only);
    }

    #[test]
    fn test_window_conversion() {
        let behaviour = Behaviour::new(5, 2);
        assert_eq!(behaviour.window(), TimeDelta::seconds(2));
        assert_eq!(Behaviour::new(5, 0).window(), TimeDelta::zero());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_window() {
        let behaviour = Behaviour::new(5, u64::MAX);
        let err = behaviour.validate().unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::InvalidConfiguration { field: "window_seconds", .. }
        ));
    }

    #[test]
    fn test_validate_accepts_zero_limit() {
        assert!(Behaviour::new(0, 10).validate().is_ok());
    }

    #[test]
    fn test_has_scope() {
        let behaviour = Behaviour {
            limit_by_ip: false,
            limit_by_user: false,
            limit_by_endpoint: false,
            ..Behaviour::default()
        };
        assert!(!behaviour.has_scope());
        assert!(Behaviour::default().has_scope());
    }
}
