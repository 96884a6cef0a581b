//! Time-windowed attempt log with timestamp deduplication.
//!
//! Each key maps to its own mutex-guarded queue of timestamps, so attempts
//! against unrelated keys never contend on one lock. Queues are kept sorted
//! ascending with unique values (oldest at the head) and expire lazily: old
//! entries are only dropped when a new attempt against the same key is
//! evaluated.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::TimeDelta;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use super::clock::{dedup_unit, Clock, Timestamp};

/// How many times a colliding timestamp is nudged forward before the clock
/// is re-sampled and the append given up on.
pub const DEDUP_RETRY_LIMIT: i32 = 1000;

/// Entries this close past the window cutoff still count as expired, so
/// nudged timestamps do not flap at the boundary.
pub fn eviction_tolerance() -> TimeDelta {
    dedup_unit() * DEDUP_RETRY_LIMIT
}

/// Outcome of an attempt against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Recorded at the given instant
    Admitted(Timestamp),
    /// Not recorded
    Rejected(Rejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Why an attempt was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The limit is zero; nothing can ever be admitted
    NoQuota,
    /// The window already holds the maximum number of attempts
    WindowFull,
    /// Every nearby timestamp slot was taken
    NoUniqueSlot,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Rejection::NoQuota => "no quota",
            Rejection::WindowFull => "window full",
            Rejection::NoUniqueSlot => "no unique timestamp slot",
        };
        f.write_str(reason)
    }
}

type Attempts = Arc<Mutex<VecDeque<Timestamp>>>;

/// A concurrent map from key to a sorted, duplicate-free queue of attempt
/// timestamps.
pub struct AttemptWindow {
    attempts: DashMap<String, Attempts>,
    clock: Arc<dyn Clock>,
}

impl AttemptWindow {
    /// Create an empty window reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            attempts: DashMap::new(),
            clock,
        }
    }

    /// Whether any attempts have ever been stored for `key`.
    pub fn exists(&self, key: &str) -> bool {
        self.attempts.contains_key(key)
    }

    /// Create the queue for `key` seeded with the current instant.
    ///
    /// Returns `None` and leaves the queue untouched if it already exists.
    pub fn create_with_first(&self, key: &str) -> Option<Timestamp> {
        match self.attempts.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let now = self.clock.now();
                entry.insert(Arc::new(Mutex::new(VecDeque::from([now]))));
                Some(now)
            }
        }
    }

    /// The oldest stored attempt for `key`.
    pub fn peek_oldest(&self, key: &str) -> Option<Timestamp> {
        self.slot(key)?.lock().front().copied()
    }

    /// Remove and return the oldest stored attempt for `key`.
    pub fn pop_oldest(&self, key: &str) -> Option<Timestamp> {
        self.slot(key)?.lock().pop_front()
    }

    /// Number of attempts stored for `key`, zero if it has none.
    pub fn size_of(&self, key: &str) -> usize {
        match self.slot(key) {
            Some(slot) => {
                let len = slot.lock().len();
                len
            }
            None => 0,
        }
    }

    /// Append the current instant to an existing queue, nudging it forward
    /// past any stored timestamp it would collide with.
    ///
    /// Returns `None` if `key` has no queue or no unique slot was found.
    pub fn append_deduplicated(&self, key: &str) -> Option<Timestamp> {
        let slot = self.slot(key)?;
        let mut attempts = slot.lock();
        let stamp = self.next_unique(&attempts, self.clock.now())?;
        attempts.push_back(stamp);
        Some(stamp)
    }

    /// Evict expired attempts, then record a new one if fewer than
    /// `max_attempts` remain.
    ///
    /// Eviction, counting, and the append all happen under the key's lock,
    /// so concurrent callers on the same key can never over-admit.
    pub fn admit(&self, key: &str, max_attempts: u32, window: TimeDelta) -> Admission {
        if max_attempts == 0 {
            return Admission::Rejected(Rejection::NoQuota);
        }

        let slot = match self.slot(key) {
            Some(slot) => slot,
            None => match self.attempts.entry(key.to_string()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let now = self.clock.now();
                    entry.insert(Arc::new(Mutex::new(VecDeque::from([now]))));
                    return Admission::Admitted(now);
                }
            },
        };

        let now = self.clock.now();
        let mut attempts = slot.lock();
        evict_expired(&mut attempts, now, window);

        if attempts.len() >= max_attempts as usize {
            return Admission::Rejected(Rejection::WindowFull);
        }

        match self.next_unique(&attempts, now) {
            Some(stamp) => {
                attempts.push_back(stamp);
                Admission::Admitted(stamp)
            }
            None => {
                warn!(key = %key, "No unique timestamp slot for attempt");
                Admission::Rejected(Rejection::NoUniqueSlot)
            }
        }
    }

    /// When the next attempt against `key` will be admitted.
    ///
    /// Never evicts, so a window that expired since the last attempt still
    /// reports its stale oldest entry until the next [`admit`](Self::admit).
    pub fn next_allowed(&self, key: &str, max_attempts: u32, window: TimeDelta) -> Timestamp {
        let now = self.clock.now();
        let Some(slot) = self.slot(key) else {
            return now;
        };

        let attempts = slot.lock();
        if attempts.len() < max_attempts as usize {
            return now;
        }

        match attempts.front() {
            Some(oldest) => oldest.checked_add_signed(window).unwrap_or(Timestamp::MAX_UTC),
            None => now,
        }
    }

    /// Number of keys with a queue.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Drop every queue.
    pub fn clear(&self) {
        self.attempts.clear();
    }

    /// Evict expired attempts from every queue and drop the keys left
    /// empty. Returns the number of keys dropped.
    ///
    /// A queue another caller is holding is kept even if empty; its next
    /// sweep will pick it up.
    pub fn purge_expired(&self, window: TimeDelta) -> usize {
        let now = self.clock.now();
        let before = self.attempts.len();

        // Holding the shard lock, so no new handle to a queue can be taken
        self.attempts.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let mut attempts = slot.lock();
            evict_expired(&mut attempts, now, window);
            !attempts.is_empty()
        });

        before.saturating_sub(self.attempts.len())
    }

    fn slot(&self, key: &str) -> Option<Attempts> {
        self.attempts.get(key).map(|entry| entry.value().clone())
    }

    /// Find a timestamp strictly later than every stored one, starting from
    /// `now`.
    fn next_unique(&self, attempts: &VecDeque<Timestamp>, now: Timestamp) -> Option<Timestamp> {
        let Some(&newest) = attempts.back() else {
            return Some(now);
        };

        // Nudging can carry the newest entry at most the tolerance past the
        // clock, so anything further behind is the clock stepping back
        if newest - now > eviction_tolerance() {
            return Some(newest + dedup_unit());
        }

        let mut candidate = now;
        let mut nudges = 0;
        while candidate <= newest {
            if nudges == DEDUP_RETRY_LIMIT {
                // The clock may have moved on while we were nudging
                let resampled = self.clock.now();
                return (resampled > newest).then_some(resampled);
            }
            candidate += dedup_unit();
            nudges += 1;
        }

        Some(candidate)
    }
}

/// Drop attempts from the head that fell out of the window ending at `now`.
fn evict_expired(attempts: &mut VecDeque<Timestamp>, now: Timestamp, window: TimeDelta) {
    let Some(cutoff) = now
        .checked_sub_signed(window)
        .and_then(|cutoff| cutoff.checked_add_signed(eviction_tolerance()))
    else {
        return;
    };

    while let Some(&oldest) = attempts.front() {
        if oldest < cutoff {
            attempts.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::{ManualClock, SystemClock};

    fn manual_window() -> (Arc<ManualClock>, AttemptWindow) {
        let clock = Arc::new(ManualClock::default());
        let window = AttemptWindow::new(clock.clone());
        (clock, window)
    }

    fn is_strictly_ascending(window: &AttemptWindow, key: &str) -> bool {
        let slot = window.slot(key).unwrap();
        let attempts = slot.lock();
        attempts.iter().zip(attempts.iter().skip(1)).all(|(a, b)| a < b)
    }

    #[test]
    fn test_create_with_first() {
        let (clock, window) = manual_window();

        assert!(!window.exists("a"));
        assert_eq!(window.create_with_first("a"), Some(clock.now()));
        assert!(window.exists("a"));
        assert_eq!(window.size_of("a"), 1);

        // Second create leaves the queue alone
        assert_eq!(window.create_with_first("a"), None);
        assert_eq!(window.size_of("a"), 1);
    }

    #[test]
    fn test_peek_and_pop_oldest() {
        let (clock, window) = manual_window();
        let first = window.create_with_first("a").unwrap();
        clock.advance(TimeDelta::seconds(1));
        let second = window.append_deduplicated("a").unwrap();

        assert_eq!(window.peek_oldest("a"), Some(first));
        assert_eq!(window.pop_oldest("a"), Some(first));
        assert_eq!(window.peek_oldest("a"), Some(second));
        assert_eq!(window.pop_oldest("a"), Some(second));
        assert_eq!(window.pop_oldest("a"), None);
        assert_eq!(window.peek_oldest("missing"), None);
    }

    #[test]
    fn test_append_requires_existing_queue() {
        let (_clock, window) = manual_window();
        assert_eq!(window.append_deduplicated("missing"), None);
        assert!(!window.exists("missing"));
    }

    #[test]
    fn test_append_nudges_colliding_timestamps() {
        let (clock, window) = manual_window();
        let start = clock.now();
        window.create_with_first("a");

        for i in 1..=10 {
            let stamp = window.append_deduplicated("a").unwrap();
            assert_eq!(stamp, start + dedup_unit() * i);
        }

        assert_eq!(window.size_of("a"), 11);
        assert!(is_strictly_ascending(&window, "a"));
    }

    #[test]
    fn test_append_fails_when_no_unique_slot() {
        let (_clock, window) = manual_window();
        window.create_with_first("a");

        for _ in 0..DEDUP_RETRY_LIMIT {
            assert!(window.append_deduplicated("a").is_some());
        }

        // Frozen clock, every slot within the retry limit is taken
        assert_eq!(window.append_deduplicated("a"), None);
        assert_eq!(window.size_of("a"), DEDUP_RETRY_LIMIT as usize + 1);
    }

    #[test]
    fn test_append_after_clock_steps_backwards() {
        let (clock, window) = manual_window();
        let start = clock.now();
        window.create_with_first("a");

        clock.set(start - TimeDelta::milliseconds(50));
        for i in 1..=3 {
            assert_eq!(window.append_deduplicated("a"), Some(start + dedup_unit() * i));
        }

        clock.set(start + TimeDelta::milliseconds(1));
        assert_eq!(
            window.append_deduplicated("a"),
            Some(start + TimeDelta::milliseconds(1))
        );
        assert_eq!(window.size_of("a"), 5);
        assert!(is_strictly_ascending(&window, "a"));
    }

    #[test]
    fn test_admit_after_clock_steps_backwards_keeps_quota() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(3600);

        assert!(window.admit("ip", 100, w).is_admitted());
        clock.advance(TimeDelta::milliseconds(-50));
        for _ in 0..3 {
            assert!(window.admit("ip", 100, w).is_admitted());
        }

        assert_eq!(window.size_of("ip"), 4);
        assert!(is_strictly_ascending(&window, "ip"));
    }

    #[test]
    fn test_admit_within_limit() {
        let (_clock, window) = manual_window();
        let limit = 5;

        for _ in 0..limit {
            assert!(window.admit("ip", limit, TimeDelta::seconds(60)).is_admitted());
        }
        assert_eq!(
            window.admit("ip", limit, TimeDelta::seconds(60)),
            Admission::Rejected(Rejection::WindowFull)
        );
        assert_eq!(window.size_of("ip"), 5);
    }

    #[test]
    fn test_admit_zero_limit_creates_nothing() {
        let (_clock, window) = manual_window();
        assert_eq!(
            window.admit("ip", 0, TimeDelta::seconds(60)),
            Admission::Rejected(Rejection::NoQuota)
        );
        assert!(!window.exists("ip"));
        assert!(window.is_empty());
    }

    #[test]
    fn test_admit_evicts_expired_attempts() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(2);

        for _ in 0..3 {
            assert!(window.admit("ip", 3, w).is_admitted());
            clock.advance(TimeDelta::milliseconds(500));
        }
        assert!(!window.admit("ip", 3, w).is_admitted());

        // The first attempt (t=0) falls out of the window at t=2s
        clock.advance(TimeDelta::milliseconds(500));
        assert!(window.admit("ip", 3, w).is_admitted());
        assert_eq!(window.size_of("ip"), 3);
    }

    #[test]
    fn test_admit_evicts_within_tolerance_of_cutoff() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(1);

        assert!(window.admit("ip", 1, w).is_admitted());
        // Not quite a full window later, but inside the eviction tolerance
        clock.advance(w - eviction_tolerance() + dedup_unit());
        assert!(window.admit("ip", 1, w).is_admitted());
    }

    #[test]
    fn test_admit_frozen_clock_exhausts_dedup() {
        let (_clock, window) = manual_window();
        let w = TimeDelta::seconds(60);

        for _ in 0..=DEDUP_RETRY_LIMIT {
            assert!(window.admit("ip", 5000, w).is_admitted());
        }
        assert_eq!(
            window.admit("ip", 5000, w),
            Admission::Rejected(Rejection::NoUniqueSlot)
        );
    }

    #[test]
    fn test_next_allowed() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(10);
        let start = clock.now();

        assert_eq!(window.next_allowed("ip", 2, w), start);

        window.admit("ip", 2, w);
        assert_eq!(window.next_allowed("ip", 2, w), start);

        clock.advance(TimeDelta::seconds(1));
        window.admit("ip", 2, w);
        assert_eq!(window.next_allowed("ip", 2, w), start + w);
    }

    #[test]
    fn test_next_allowed_never_evicts() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(1);
        let start = clock.now();

        window.admit("ip", 1, w);
        clock.advance(TimeDelta::seconds(30));

        // Stale until the next admit runs eviction
        assert_eq!(window.next_allowed("ip", 1, w), start + w);
        assert_eq!(window.size_of("ip"), 1);
    }

    #[test]
    fn test_concurrent_admits_never_exceed_limit() {
        let window = AttemptWindow::new(Arc::new(SystemClock));
        let admitted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        if window.admit("shared", 100, TimeDelta::seconds(3600)).is_admitted() {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(std::sync::atomic::Ordering::SeqCst), 100);
        assert_eq!(window.size_of("shared"), 100);
        assert!(is_strictly_ascending(&window, "shared"));
    }

    #[test]
    fn test_purge_expired_drops_idle_keys() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(3600);

        for n in 0..1000 {
            assert!(window.admit(&format!("10.0.{}.{}", n / 256, n % 256), 5, w).is_admitted());
        }
        clock.advance(TimeDelta::hours(1));
        assert!(window.admit("fresh", 5, w).is_admitted());

        assert_eq!(window.purge_expired(w), 1000);
        assert_eq!(window.len(), 1);
        assert_eq!(window.size_of("fresh"), 1);
    }

    #[test]
    fn test_purge_expired_keeps_held_queue() {
        let (clock, window) = manual_window();
        let w = TimeDelta::seconds(1);
        window.admit("ip", 5, w);
        clock.advance(TimeDelta::seconds(10));

        let held = window.slot("ip").unwrap();
        assert_eq!(window.purge_expired(w), 0);
        assert!(window.exists("ip"));

        drop(held);
        assert_eq!(window.purge_expired(w), 1);
        assert!(!window.exists("ip"));
    }

    #[test]
    fn test_clear() {
        let (_clock, window) = manual_window();
        window.create_with_first("a");
        window.create_with_first("b");
        assert_eq!(window.len(), 2);

        window.clear();
        assert!(window.is_empty());
    }
}
