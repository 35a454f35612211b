//! Per-identifier failure counting with time-boxed lockout.
//!
//! Both the access token issuer (keyed by peer IP) and the email OTP verifier
//! (keyed by session id) own an independent [`LockoutTracker`]. The tracker is a
//! plain data structure; callers serialize access through their own lock so
//! that "check lockout, evaluate credential, record outcome" stays atomic.

use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lockout.
    pub max_failed_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 10,
            lockout_duration: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailedAttempts {
    count: u32,
    locked_until: Option<Instant>,
}

#[derive(Debug)]
pub struct LockoutTracker<K> {
    policy: LockoutPolicy,
    records: HashMap<K, FailedAttempts>,
}

impl<K: Eq + Hash> LockoutTracker<K> {
    #[must_use]
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Remaining lockout for `key`, or `None` if it may be evaluated.
    ///
    /// A future `locked_until` is authoritative regardless of when the last
    /// sweep ran.
    #[must_use]
    pub fn locked_for(&self, key: &K, now: Instant) -> Option<Duration> {
        let until = self.records.get(key)?.locked_until?;
        let remaining = until.saturating_duration_since(now);
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Count one failure. Returns the lockout length when this failure is the
    /// one that crossed the threshold.
    pub fn record_failure(&mut self, key: K, now: Instant) -> Option<Duration> {
        let policy = self.policy;
        let record = self.records.entry(key).or_insert(FailedAttempts {
            count: 0,
            locked_until: None,
        });

        // An elapsed lockout starts a fresh count.
        if record.locked_until.is_some_and(|until| until <= now) {
            *record = FailedAttempts {
                count: 0,
                locked_until: None,
            };
        }

        record.count = record.count.saturating_add(1);
        if record.count >= policy.max_failed_attempts && record.locked_until.is_none() {
            record.locked_until = Some(now + policy.lockout_duration);
            return Some(policy.lockout_duration);
        }
        None
    }

    /// Forget all failures for `key` after a successful check.
    pub fn clear(&mut self, key: &K) {
        self.records.remove(key);
    }

    /// Drop records whose lockout has elapsed. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.locked_until.is_none_or(|until| until > now));
        before - self.records.len()
    }

    #[must_use]
    pub fn failure_count(&self, key: &K) -> u32 {
        self.records.get(key).map_or(0, |r| r.count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Whole seconds left on a lockout, rounded up so a caller is never told to
/// retry "in 0 seconds".
#[must_use]
pub fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}
