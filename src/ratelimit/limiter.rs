//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;
use tracing::{debug, info};

use super::auth::{basic_authorization, AuthStatus};
use super::backend::AdmissionControl;
use super::behaviour::Behaviour;
use super::clock::{Clock, SystemClock};
use super::identity::{self, Identity, IdentityKind};
use super::store::AttemptStore;
use super::window::{Admission, Rejection};

/// A rejected attempt, with enough context to advise the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    /// Kind of identity that ran out of quota
    pub kind: IdentityKind,
    /// The IP, token, or endpoint owner
    pub key: String,
    /// The endpoint, for endpoint-scoped identities
    pub endpoint: Option<String>,
    /// Why the attempt was not recorded
    pub reason: Rejection,
    /// Seconds until the next attempt would be admitted, at least 1.
    /// `None` when no attempt can ever be admitted.
    pub retry_after_secs: Option<u64>,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Too many requests for {}", self.kind)?;
        if let Some(endpoint) = &self.endpoint {
            write!(f, " at endpoint {}", endpoint)?;
        }
        match self.retry_after_secs {
            Some(1) => write!(f, ". Try again in 1 second."),
            Some(secs) => write!(f, ". Try again in {} seconds.", secs),
            None => write!(f, "."),
        }
    }
}

/// The rate limiter that resolves identities and decides admission.
///
/// This struct is thread-safe and is meant to be created once and shared
/// across every request handler.
pub struct RateLimiter {
    behaviour: Behaviour,
    store: AttemptStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    pub fn new(behaviour: Behaviour) -> crate::error::Result<Self> {
        Self::with_clock(behaviour, Arc::new(SystemClock))
    }

    /// Create a rate limiter reading time from `clock`.
    ///
    /// Fails if `behaviour` is not valid.
    pub fn with_clock(behaviour: Behaviour, clock: Arc<dyn Clock>) -> crate::error::Result<Self> {
        behaviour.validate()?;

        debug!(
            request_limit = behaviour.request_limit,
            window_seconds = behaviour.window_seconds,
            by_ip = behaviour.limit_by_ip,
            by_user = behaviour.limit_by_user,
            by_endpoint = behaviour.limit_by_endpoint,
            "Creating rate limiter"
        );

        Ok(Self {
            behaviour,
            store: AttemptStore::new(clock.clone()),
            clock,
        })
    }

    pub fn behaviour(&self) -> &Behaviour {
        &self.behaviour
    }

    /// The underlying attempt store.
    pub fn store(&self) -> &AttemptStore {
        &self.store
    }

    /// Resolve the identity for a request under this limiter's behaviour.
    pub fn resolve_identity(
        &self,
        client_ip: &str,
        user_auth: &str,
        endpoint_key: &str,
    ) -> Option<Identity> {
        Identity::resolve(client_ip, user_auth, endpoint_key, &self.behaviour)
    }

    /// Record an attempt for `identity`.
    ///
    /// Returns `None` if the attempt was admitted, or the rejection to serve.
    pub fn is_attempt_rate_limited(&self, identity: &Identity) -> Option<RateLimited> {
        let admission = self.store.record_attempt(
            identity,
            self.behaviour.request_limit,
            self.behaviour.window(),
        );

        let reason = match admission {
            Admission::Admitted(_) => return None,
            Admission::Rejected(reason) => reason,
        };

        let retry_after_secs = match reason {
            Rejection::NoQuota => None,
            _ => Some(self.retry_after_seconds(identity).max(1)),
        };

        Some(RateLimited {
            kind: identity.kind(),
            key: identity.key().to_string(),
            endpoint: identity.endpoint().map(str::to_string),
            reason,
            retry_after_secs,
        })
    }

    /// Whole seconds, rounded up, until `identity` may attempt again.
    pub fn retry_after_seconds(&self, identity: &Identity) -> u64 {
        let next = self.store.check_next_allowed(
            identity,
            self.behaviour.request_limit,
            self.behaviour.window(),
        );
        ceil_seconds(next - self.clock.now())
    }

    /// Drop identities idle for a whole window. Returns how many were
    /// dropped.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.behaviour.window())
    }

    /// Register an authorization token as approved.
    pub fn store_user_auth(&self, user_auth: &str) {
        if self.store.approved_users().record(user_auth) {
            info!("Approved user authorization stored");
        }
    }

    /// Remove an authorization token from the approved set.
    pub fn forget_user_auth(&self, user_auth: &str) {
        if self.store.approved_users().forget(user_auth) {
            info!("Approved user authorization forgotten");
        }
    }

    /// Register HTTP Basic credentials as approved.
    pub fn store_basic_auth(&self, username: &str, password: &str) {
        self.store_user_auth(&basic_authorization(username, password));
    }

    /// Remove HTTP Basic credentials from the approved set.
    pub fn forget_basic_auth(&self, username: &str, password: &str) {
        self.forget_user_auth(&basic_authorization(username, password));
    }

    /// Whether `user_auth` identifies a valid user.
    ///
    /// Any non-empty token is valid unless only approved users are allowed,
    /// in which case the token must have been stored beforehand.
    pub fn is_user_auth_valid(&self, user_auth: &str) -> bool {
        if self.behaviour.approved_users_only {
            self.store.approved_users().contains(user_auth)
        } else {
            !user_auth.is_empty()
        }
    }

    /// Gate a request on its authorization token.
    pub fn check_user_auth(&self, user_auth: &str) -> AuthStatus {
        if !self.behaviour.approved_users_only {
            return AuthStatus::Accepted;
        }
        if user_auth.is_empty() {
            AuthStatus::Missing
        } else if self.store.approved_users().contains(user_auth) {
            AuthStatus::Accepted
        } else {
            AuthStatus::Invalid
        }
    }

    /// Whether `ip` is flagged hostile. Always `false` unless hostile IPs
    /// are stored.
    pub fn is_ip_hostile(&self, ip: &str) -> bool {
        self.behaviour.store_hostile_ips && self.store.hostile_ips().contains(ip)
    }

    /// Flag `ip` as hostile. Returns `true` if it was newly flagged.
    pub fn record_ip_as_hostile(&self, ip: &str) -> bool {
        if !self.behaviour.store_hostile_ips {
            return false;
        }
        let recorded = self.store.hostile_ips().record(ip);
        if recorded {
            info!(ip = %ip, "Recorded hostile IP");
        }
        recorded
    }

    /// Clear the hostile flag on `ip`. Returns `true` if it was flagged.
    pub fn forget_ip_as_hostile(&self, ip: &str) -> bool {
        if !self.behaviour.store_hostile_ips {
            return false;
        }
        let forgotten = self.store.hostile_ips().forget(ip);
        if forgotten {
            info!(ip = %ip, "Forgot hostile IP");
        }
        forgotten
    }

    /// Form the canonical endpoint key `VERB|resource`.
    pub fn endpoint_key(&self, verb: &str, resource: &str) -> String {
        identity::endpoint_key(verb, resource)
    }
}

impl AdmissionControl for RateLimiter {
    fn resolve_identity(
        &self,
        client_ip: &str,
        user_auth: &str,
        endpoint_key: &str,
    ) -> Option<Identity> {
        RateLimiter::resolve_identity(self, client_ip, user_auth, endpoint_key)
    }

    fn is_attempt_rate_limited(&self, identity: &Identity) -> Option<RateLimited> {
        RateLimiter::is_attempt_rate_limited(self, identity)
    }

    fn retry_after_seconds(&self, identity: &Identity) -> u64 {
        RateLimiter::retry_after_seconds(self, identity)
    }

    fn check_user_auth(&self, user_auth: &str) -> AuthStatus {
        RateLimiter::check_user_auth(self, user_auth)
    }

    fn store_user_auth(&self, user_auth: &str) {
        RateLimiter::store_user_auth(self, user_auth)
    }

    fn forget_user_auth(&self, user_auth: &str) {
        RateLimiter::forget_user_auth(self, user_auth)
    }

    fn is_user_auth_valid(&self, user_auth: &str) -> bool {
        RateLimiter::is_user_auth_valid(self, user_auth)
    }

    fn is_ip_hostile(&self, ip: &str) -> bool {
        RateLimiter::is_ip_hostile(self, ip)
    }

    fn record_ip_as_hostile(&self, ip: &str) -> bool {
        RateLimiter::record_ip_as_hostile(self, ip)
    }

    fn forget_ip_as_hostile(&self, ip: &str) -> bool {
        RateLimiter::forget_ip_as_hostile(self, ip)
    }
}

fn ceil_seconds(delta: TimeDelta) -> u64 {
    if delta <= TimeDelta::zero() {
        return 0;
    }
    let millis = delta.num_milliseconds() as u64;
    millis.div_ceil(1000)
}
