//! Attempt store: the per-namespace attempt windows and the registries.

use std::sync::Arc;

use chrono::TimeDelta;
use tracing::debug;

use super::clock::{Clock, SystemClock, Timestamp};
use super::identity::{Identity, IdentityKind};
use super::registry::Registry;
use super::window::{Admission, AttemptWindow, Rejection};

/// Owns the attempt windows for every identity kind, plus the hostile-IP
/// and approved-user registries.
///
/// Created once per process and shared by every request handler.
pub struct AttemptStore {
    /// Attempts keyed by client IP
    ip_attempts: AttemptWindow,
    /// Attempts keyed by authorization token
    user_attempts: AttemptWindow,
    /// Attempts keyed by owner and endpoint
    endpoint_attempts: AttemptWindow,
    hostile_ips: Registry,
    approved_users: Registry,
}

impl AttemptStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            ip_attempts: AttemptWindow::new(clock.clone()),
            user_attempts: AttemptWindow::new(clock.clone()),
            endpoint_attempts: AttemptWindow::new(clock),
            hostile_ips: Registry::new(),
            approved_users: Registry::new(),
        }
    }

    /// Record an attempt for `identity` if it has quota left in the
    /// trailing `window`.
    pub fn record_attempt(
        &self,
        identity: &Identity,
        max_attempts: u32,
        window: TimeDelta,
    ) -> Admission {
        let attempts = self.window_for(identity.kind());
        let key = identity.storage_key();

        let admission = if identity.is_endpoint() && !attempts.exists(&key) {
            if max_attempts == 0 {
                Admission::Rejected(Rejection::NoQuota)
            } else {
                match attempts.create_with_first(&key) {
                    Some(now) => Admission::Admitted(now),
                    // Lost the race to create it, count against the new window
                    None => attempts.admit(&key, max_attempts, window),
                }
            }
        } else {
            attempts.admit(&key, max_attempts, window)
        };

        match admission {
            Admission::Admitted(stored_on) => debug!(
                kind = %identity.kind(),
                key = %identity.key(),
                endpoint = identity.endpoint().unwrap_or_default(),
                outcome = "stored",
                stored_on = %stored_on,
                "Attempt evaluated"
            ),
            Admission::Rejected(reason) => debug!(
                kind = %identity.kind(),
                key = %identity.key(),
                endpoint = identity.endpoint().unwrap_or_default(),
                outcome = "rejected",
                reason = %reason,
                "Attempt evaluated"
            ),
        }

        admission
    }

    /// When the next attempt for `identity` will be admitted.
    ///
    /// Read-only: expired attempts are not evicted here, so the answer can
    /// lag behind the true expiry until the next [`record_attempt`](Self::record_attempt).
    pub fn check_next_allowed(
        &self,
        identity: &Identity,
        max_attempts: u32,
        window: TimeDelta,
    ) -> Timestamp {
        self.window_for(identity.kind())
            .next_allowed(&identity.storage_key(), max_attempts, window)
    }

    /// Number of attempts currently stored for `identity`.
    pub fn attempt_count(&self, identity: &Identity) -> usize {
        self.window_for(identity.kind())
            .size_of(&identity.storage_key())
    }

    /// Number of identities with stored attempts, across all namespaces.
    pub fn tracked_identities(&self) -> usize {
        self.ip_attempts.len() + self.user_attempts.len() + self.endpoint_attempts.len()
    }

    /// Drop identities whose attempts have all left the trailing `window`.
    /// Returns how many were dropped.
    pub fn purge_expired(&self, window: TimeDelta) -> usize {
        let purged = self.ip_attempts.purge_expired(window)
            + self.user_attempts.purge_expired(window)
            + self.endpoint_attempts.purge_expired(window);
        if purged > 0 {
            debug!(purged, "Purged idle identities");
        }
        purged
    }

    /// Drop every stored attempt. Registries are left alone.
    pub fn clear(&self) {
        self.ip_attempts.clear();
        self.user_attempts.clear();
        self.endpoint_attempts.clear();
    }

    pub fn hostile_ips(&self) -> &Registry {
        &self.hostile_ips
    }

    pub fn approved_users(&self) -> &Registry {
        &self.approved_users
    }

    fn window_for(&self, kind: IdentityKind) -> &AttemptWindow {
        match kind {
            IdentityKind::Ip => &self.ip_attempts,
            IdentityKind::User => &self.user_attempts,
            IdentityKind::Endpoint => &self.endpoint_attempts,
        }
    }
}

impl Default for AttemptStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
