//! Short-lived optimistic edit locks.
//!
//! A page's lock fields `(expires_at, token)` guard its head record while a
//! write is in flight. The protocol:
//!
//! 1. [`try_acquire`]: stake a claim. The store performs this as a single
//!    conditional update, so of two simultaneous acquirers exactly one wins.
//! 2. [`confirm`]: re-read the fields and verify they still match the
//!    claim. This double-check guards the expiry path: a writer that stalls
//!    past its own expiry discovers here that someone reclaimed the lock.
//! 3. Commit the write. The store clears the lock as part of the commit.
//!
//! A failed write never releases: the lock is left to lapse, which acts as
//! a cooldown. Expired locks are reclaimed by the next acquirer; there is
//! no background sweep. No step blocks; contention is reported as `Busy`
//! and the caller surfaces a conflict instead of retrying.
//!
//! Time and randomness are injected so the protocol is deterministic under
//! test: [`SystemClock`] and [`ThreadRngSource`] are the production pair,
//! [`ManualClock`] and [`FixedRandom`] the test pair. Tokens only need to
//! be unlikely to collide within one 60-second lock window.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::page::{PageId, PageLock};
use crate::store::{PageStore, StoreResult};

/// How long a staked lock lasts.
pub const LOCK_DURATION_SECS: i64 = 60;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock pinned at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `seconds`.
    pub fn advance_secs(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Source of randomness, passed in explicitly rather than reached for
/// ambiently, so tests can pin it.
pub trait RandomSource: Send + Sync {
    /// A fresh lock token. Collisions need only be unlikely within one
    /// lock window, not globally unique.
    fn lock_token(&self) -> i32;

    /// Uniform pick in `0..bound`. `bound` must be at least 1.
    fn pick(&self, bound: usize) -> usize;
}

/// Thread-local RNG; tokens uniform over `0..i32::MAX`.
#[derive(Debug, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn lock_token(&self) -> i32 {
        rand::rng().random_range(0..i32::MAX)
    }

    fn pick(&self, bound: usize) -> usize {
        rand::rng().random_range(0..bound)
    }
}

/// Deterministic counter for tests: tokens count up, picks cycle.
#[derive(Debug, Default)]
pub struct FixedRandom {
    next: Mutex<i32>,
}

impl FixedRandom {
    /// Values counting up from `start`.
    pub fn starting_at(start: i32) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }

    fn step(&self) -> i32 {
        let mut next = self.next.lock().unwrap();
        let value = *next;
        *next += 1;
        value
    }
}

impl RandomSource for FixedRandom {
    fn lock_token(&self) -> i32 {
        self.step()
    }

    fn pick(&self, bound: usize) -> usize {
        self.step() as usize % bound
    }
}

/// A staked lock, held by the writer that acquired it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockClaim {
    /// The locked page.
    pub page_id: PageId,
    /// The fields written to the page, for the confirm step.
    pub lock: PageLock,
}

/// Stake a claim on the page's lock.
///
/// Returns `None` (`Busy`) when another writer holds an unexpired lock.
/// An expired lock is reclaimed here as a side effect of the conditional
/// update; nothing else ever cleans one up.
pub fn try_acquire(
    store: &dyn PageStore,
    page_id: PageId,
    clock: &dyn Clock,
    random: &dyn RandomSource,
) -> StoreResult<Option<LockClaim>> {
    let now = clock.now();
    let lock = PageLock {
        expires_at: now + Duration::seconds(LOCK_DURATION_SECS),
        token: random.lock_token(),
    };
    if store.acquire_lock(page_id, lock, now)? {
        Ok(Some(LockClaim { page_id, lock }))
    } else {
        log::debug!("page {page_id} is locked, acquire reported busy");
        Ok(None)
    }
}

/// Verify the claim still holds: the page's lock fields must equal exactly
/// what [`try_acquire`] wrote. `false` means another writer re-acquired in
/// between and the edit must fail as a conflict.
pub fn confirm(store: &dyn PageStore, claim: &LockClaim) -> StoreResult<bool> {
    let held = store.read_lock(claim.page_id)?;
    Ok(held == Some(claim.lock))
}

/// Clear the page's lock fields unconditionally.
///
/// Only for a holder that finished outside the normal commit path; a
/// successful [`crate::store::PageStore::commit_write`] already clears the
/// lock atomically, and a failed write leaves it to expire.
pub fn release(store: &dyn PageStore, page_id: PageId) -> StoreResult<()> {
    store.release_lock(page_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{NewRevision, PageDraft};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn page_in(store: &MemoryStore) -> PageId {
        let draft = PageDraft::new("Alpha", "body", start());
        let rev = NewRevision::new(1, "create", String::new(), String::new(), start());
        store.create_page(&draft, &rev).unwrap().unwrap().id
    }

    #[test]
    fn test_acquire_then_busy() {
        let store = MemoryStore::new();
        let id = page_in(&store);
        let clock = ManualClock::new(start());
        let random = FixedRandom::starting_at(100);

        let claim = try_acquire(&store, id, &clock, &random).unwrap().unwrap();
        assert_eq!(claim.lock.token, 100);
        assert_eq!(
            claim.lock.expires_at,
            start() + Duration::seconds(LOCK_DURATION_SECS)
        );

        // A second writer is turned away while the lock is fresh.
        assert!(try_acquire(&store, id, &clock, &random).unwrap().is_none());
        clock.advance_secs(59);
        assert!(try_acquire(&store, id, &clock, &random).unwrap().is_none());
    }

    #[test]
    fn test_expired_lock_reclaimed_by_next_acquirer() {
        let store = MemoryStore::new();
        let id = page_in(&store);
        let clock = ManualClock::new(start());
        let random = FixedRandom::starting_at(0);

        let first = try_acquire(&store, id, &clock, &random).unwrap().unwrap();
        clock.advance_secs(LOCK_DURATION_SECS);
        let second = try_acquire(&store, id, &clock, &random).unwrap().unwrap();
        assert_ne!(first.lock.token, second.lock.token);

        // The stalled first writer fails its confirm.
        assert!(!confirm(&store, &first).unwrap());
        assert!(confirm(&store, &second).unwrap());
    }

    #[test]
    fn test_confirm_matches_exact_fields() {
        let store = MemoryStore::new();
        let id = page_in(&store);
        let clock = ManualClock::new(start());
        let random = FixedRandom::starting_at(7);

        let claim = try_acquire(&store, id, &clock, &random).unwrap().unwrap();
        assert!(confirm(&store, &claim).unwrap());

        let mut altered = claim;
        altered.lock.token += 1;
        assert!(!confirm(&store, &altered).unwrap());
    }

    #[test]
    fn test_release_clears_fields() {
        let store = MemoryStore::new();
        let id = page_in(&store);
        let clock = ManualClock::new(start());
        let random = FixedRandom::starting_at(0);

        let claim = try_acquire(&store, id, &clock, &random).unwrap().unwrap();
        release(&store, id).unwrap();
        assert!(!confirm(&store, &claim).unwrap());
        // And the next writer acquires immediately.
        assert!(try_acquire(&store, id, &clock, &random).unwrap().is_some());
    }

    #[test]
    fn test_missing_page_reports_busy() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(start());
        let random = FixedRandom::starting_at(0);
        assert!(
            try_acquire(&store, PageId(404), &clock, &random)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_fixed_random_pick_cycles() {
        let random = FixedRandom::starting_at(0);
        assert_eq!(random.pick(3), 0);
        assert_eq!(random.pick(3), 1);
        assert_eq!(random.pick(3), 2);
        assert_eq!(random.pick(3), 0);
    }
}
