//! The admission control interface consumed by request-serving frontends.

use super::auth::AuthStatus;
use super::identity::Identity;
use super::limiter::RateLimited;

/// Trait for admission control implementations.
///
/// This is everything a frontend needs from the engine: identity
/// resolution, the per-request decision, the retry advisory, and the
/// authorization and hostile-IP registries.
pub trait AdmissionControl: Send + Sync {
    /// Resolve the identity a request is counted against, if any.
    fn resolve_identity(&self, client_ip: &str, user_auth: &str, endpoint_key: &str)
        -> Option<Identity>;

    /// Record an attempt, returning the rejection if it is rate limited.
    fn is_attempt_rate_limited(&self, identity: &Identity) -> Option<RateLimited>;

    /// Seconds until `identity` may attempt again.
    fn retry_after_seconds(&self, identity: &Identity) -> u64;

    /// Gate a request on its authorization token.
    fn check_user_auth(&self, user_auth: &str) -> AuthStatus;

    /// Register an authorization token as approved.
    fn store_user_auth(&self, user_auth: &str);

    /// Remove an authorization token from the approved set.
    fn forget_user_auth(&self, user_auth: &str);

    /// Whether `user_auth` identifies a valid user.
    fn is_user_auth_valid(&self, user_auth: &str) -> bool;

    /// Whether `ip` has been flagged hostile.
    fn is_ip_hostile(&self, ip: &str) -> bool;

    /// Flag `ip` as hostile. Returns `true` if it was newly flagged.
    fn record_ip_as_hostile(&self, ip: &str) -> bool;

    /// Clear the hostile flag on `ip`. Returns `true` if it was flagged.
    fn forget_ip_as_hostile(&self, ip: &str) -> bool;

    /// Form the canonical endpoint key for a verb and route.
    fn endpoint_key(&self, verb: &str, resource: &str) -> String {
        super::identity::endpoint_key(verb, resource)
    }
}
