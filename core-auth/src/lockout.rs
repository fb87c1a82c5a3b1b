//! # Progressive Lockout
//!
//! Brute-force protection for authentication identifiers (usernames, IP and
//! username pairs).
//!
//! Every failure increments a per-identifier counter. When the counter lands
//! exactly on a tier threshold the identifier is locked for that tier's
//! delay; failures past the last threshold re-apply the last delay. While a
//! lockout is active further failures are not counted and only report the
//! time left. A success clears the identifier entirely.
//!
//! Lockouts are stored as absolute expiry instants, so [`ProgressiveLockout::cleanup`]
//! never changes whether an identifier is currently locked. The instant of the
//! most recent lockout stays on the record after it elapses; reading the delay
//! has no effect on what cleanup removes.
//!
//! No operation here fails.

use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_runtime::config::{LockoutConfig, LockoutTier};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct FailureRecord {
    count: u32,
    /// Most recent lockout, kept after it elapses
    lockout_expires_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Tiered-delay failure tracker.
pub struct ProgressiveLockout {
    tiers: Vec<LockoutTier>,
    records: Mutex<HashMap<String, FailureRecord>>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
}

impl ProgressiveLockout {
    pub fn new(config: &LockoutConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &LockoutConfig, clock: Arc<dyn Clock>) -> Self {
        let mut tiers = config.tiers.clone();
        tiers.sort_by_key(|tier| tier.threshold);

        Self {
            tiers,
            records: Mutex::new(HashMap::new()),
            clock,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Count a failed attempt and return the lockout it triggers, in seconds.
    ///
    /// During an active lockout the failure is not counted and the remaining
    /// seconds are returned instead. Returns 0 if no lockout applies.
    pub fn record_failure(&self, identifier: &str) -> u64 {
        let now = self.clock.now();
        let mut records = self.lock();
        let record = records.entry(identifier.to_string()).or_default();

        if let Some(remaining) = remaining_secs(record.lockout_expires_at, now) {
            debug!(identifier = %identifier, remaining, "Failure during active lockout");
            return remaining;
        }

        record.count = record.count.saturating_add(1);
        record.last_failure_at = Some(now);

        let Some(delay) = self.delay_for(record.count) else {
            debug!(identifier = %identifier, failures = record.count, "Failed attempt recorded");
            return 0;
        };

        let lockout_secs = delay.as_secs();
        record.lockout_expires_at = Some(add_secs(now, lockout_secs));
        let failures = record.count;
        drop(records);

        warn!(
            identifier = %identifier,
            failures,
            lockout_secs,
            "Lockout triggered"
        );
        self.emit(AuthEvent::LockoutTriggered {
            identifier: identifier.to_string(),
            failures,
            lockout_secs,
        });

        lockout_secs
    }

    /// Forget every failure recorded for `identifier`.
    pub fn record_success(&self, identifier: &str) {
        let removed = self.lock().remove(identifier);

        if let Some(record) = removed {
            info!(
                identifier = %identifier,
                failures = record.count,
                "Failure history cleared"
            );
            self.emit(AuthEvent::LockoutCleared {
                identifier: identifier.to_string(),
            });
        }
    }

    /// Seconds left on the identifier's lockout, 0 if none or elapsed.
    pub fn get_delay(&self, identifier: &str) -> u64 {
        let now = self.clock.now();
        self.lock()
            .get(identifier)
            .and_then(|record| remaining_secs(record.lockout_expires_at, now))
            .unwrap_or(0)
    }

    pub fn is_locked(&self, identifier: &str) -> bool {
        self.get_delay(identifier) > 0
    }

    /// Failures counted for `identifier` since its last success or cleanup.
    pub fn failure_count(&self, identifier: &str) -> u32 {
        self.lock()
            .get(identifier)
            .map(|record| record.count)
            .unwrap_or(0)
    }

    /// Drop records that no longer influence any decision.
    ///
    /// Removes identifiers whose most recent lockout has expired, along with
    /// their failure count, and identifiers that never reached a lockout whose
    /// last failure is older than the longest tier delay. Returns how many
    /// records were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let horizon = self
            .tiers
            .last()
            .map(|tier| tier.delay)
            .unwrap_or(Duration::ZERO);
        let stale_before = sub_secs(now, horizon.as_secs());

        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| match record.lockout_expires_at {
            Some(expires_at) => expires_at > now,
            None => record
                .last_failure_at
                .is_some_and(|last| last > stale_before),
        });
        let removed = before - records.len();

        if removed > 0 {
            debug!(removed, remaining = records.len(), "Lockout records cleaned up");
        }
        removed
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn delay_for(&self, count: u32) -> Option<Duration> {
        if let Some(tier) = self.tiers.iter().find(|tier| tier.threshold == count) {
            return Some(tier.delay);
        }

        self.tiers
            .last()
            .filter(|last| count > last.threshold)
            .map(|last| last.delay)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FailureRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Auth(event));
        }
    }
}

impl std::fmt::Debug for ProgressiveLockout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveLockout")
            .field("tiers", &self.tiers)
            .field("tracked", &self.len())
            .finish()
    }
}

/// Whole seconds left until `expires_at`, rounded up; `None` once elapsed.
fn remaining_secs(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<u64> {
    let millis = expires_at?.signed_duration_since(now).num_milliseconds();
    if millis <= 0 {
        return None;
    }
    Some((millis as u64).div_ceil(1000))
}

fn add_secs(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn sub_secs(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;

    fn lockout() -> (ProgressiveLockout, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let lockout = ProgressiveLockout::with_clock(&LockoutConfig::default(), clock.clone());
        (lockout, clock)
    }

    fn wait(clock: &ManualClock, secs: u64) {
        clock.advance(chrono::Duration::seconds(secs as i64));
    }

    #[test]
    fn test_first_two_failures_are_free() {
        let (lockout, _) = lockout();
        assert_eq!(lockout.record_failure("alice"), 0);
        assert_eq!(lockout.record_failure("alice"), 0);
        assert_eq!(lockout.failure_count("alice"), 2);
        assert_eq!(lockout.get_delay("alice"), 0);
    }

    #[test]
    fn test_tier_sequence() {
        let (lockout, clock) = lockout();
        let expected = [
            (1, 0),
            (2, 0),
            (3, 30),
            (4, 0),
            (5, 120),
            (6, 0),
            (7, 300),
            (8, 0),
            (9, 0),
            (10, 900),
            (15, 1800),
            (20, 3600),
        ];

        let mut count = 0;
        for (target, delay) in expected {
            while count < target {
                count += 1;
                let got = lockout.record_failure("alice");
                if count == target {
                    assert_eq!(got, delay, "failure #{}", count);
                }
                wait(&clock, got);
            }
        }
    }

    #[test]
    fn test_failures_past_last_tier_reapply_last_delay() {
        let (lockout, clock) = lockout();
        for _ in 0..20 {
            let delay = lockout.record_failure("alice");
            wait(&clock, delay);
        }
        assert_eq!(lockout.record_failure("alice"), 3600);
    }

    #[test]
    fn test_failure_during_lockout_reports_remaining() {
        let (lockout, clock) = lockout();
        for _ in 0..3 {
            lockout.record_failure("alice");
        }

        wait(&clock, 10);
        assert_eq!(lockout.record_failure("alice"), 20);
        assert_eq!(lockout.failure_count("alice"), 3);
        assert_eq!(lockout.get_delay("alice"), 20);
        assert!(lockout.is_locked("alice"));
    }

    #[test]
    fn test_remaining_rounds_up() {
        let (lockout, clock) = lockout();
        for _ in 0..3 {
            lockout.record_failure("alice");
        }

        clock.advance(chrono::Duration::milliseconds(29_500));
        assert_eq!(lockout.get_delay("alice"), 1);

        clock.advance(chrono::Duration::milliseconds(500));
        assert_eq!(lockout.get_delay("alice"), 0);
        assert!(!lockout.is_locked("alice"));
    }

    #[test]
    fn test_success_clears_everything() {
        let (lockout, _) = lockout();
        for _ in 0..3 {
            lockout.record_failure("alice");
        }

        lockout.record_success("alice");

        assert_eq!(lockout.get_delay("alice"), 0);
        assert_eq!(lockout.record_failure("alice"), 0);
        assert_eq!(lockout.failure_count("alice"), 1);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (lockout, _) = lockout();
        for _ in 0..3 {
            lockout.record_failure("alice");
        }

        assert!(lockout.is_locked("alice"));
        assert!(!lockout.is_locked("bob"));
        assert_eq!(lockout.record_failure("bob"), 0);
    }

    #[test]
    fn test_cleanup_removes_expired_lockouts_only() {
        let (lockout, clock) = lockout();
        for _ in 0..3 {
            lockout.record_failure("expired");
        }
        wait(&clock, 31);
        for _ in 0..3 {
            lockout.record_failure("active");
        }
        lockout.record_failure("pending");

        assert_eq!(lockout.cleanup(), 1);
        assert_eq!(lockout.len(), 2);
        assert!(lockout.is_locked("active"));
        assert_eq!(lockout.failure_count("pending"), 1);
    }

    #[test]
    fn test_cleanup_drops_stale_unlocked_records() {
        let (lockout, clock) = lockout();
        lockout.record_failure("idle");

        wait(&clock, 3599);
        assert_eq!(lockout.cleanup(), 0);

        wait(&clock, 2);
        assert_eq!(lockout.cleanup(), 1);
        assert!(lockout.is_empty());
    }

    #[test]
    fn test_cleanup_ignores_prior_delay_reads() {
        let (read, clock) = lockout();
        let (unread, unread_clock) = lockout();
        for _ in 0..3 {
            read.record_failure("alice");
            unread.record_failure("alice");
        }
        wait(&clock, 31);
        wait(&unread_clock, 31);

        assert_eq!(read.get_delay("alice"), 0);
        assert!(!read.is_locked("alice"));

        assert_eq!(read.cleanup(), 1);
        assert_eq!(unread.cleanup(), 1);

        for lockout in [&read, &unread] {
            assert_eq!(lockout.failure_count("alice"), 0);
            assert_eq!(lockout.record_failure("alice"), 0);
            assert_eq!(lockout.record_failure("alice"), 0);
        }
    }

    #[test]
    fn test_failures_after_expired_lockout_keep_escalating() {
        let (lockout, clock) = lockout();
        for _ in 0..3 {
            lockout.record_failure("alice");
        }
        wait(&clock, 31);

        assert_eq!(lockout.get_delay("alice"), 0);
        assert_eq!(lockout.record_failure("alice"), 0);
        assert_eq!(lockout.record_failure("alice"), 120);
    }

    #[tokio::test]
    async fn test_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let lockout = ProgressiveLockout::with_clock(
            &LockoutConfig::default(),
            Arc::new(ManualClock::starting_now()),
        )
        .with_event_bus(bus);

        for _ in 0..3 {
            lockout.record_failure("alice");
        }
        lockout.record_success("alice");

        assert_eq!(
            rx.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::LockoutTriggered {
                identifier: "alice".to_string(),
                failures: 3,
                lockout_secs: 30,
            })
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::LockoutCleared {
                identifier: "alice".to_string(),
            })
        );
    }
}
