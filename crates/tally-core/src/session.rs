//! In-memory session store for pending transactions
//!
//! Holds at most one [`PendingTransaction`] per user. Each user gets their own
//! async mutex ("slot"), so events for one user are serialized while events
//! for different users proceed in parallel. The map of slots is only locked
//! briefly to look up or insert a slot, never across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{PendingTransaction, UserIdentity};

type Slot = Arc<AsyncMutex<Option<PendingTransaction>>>;

/// Exclusive access to one user's pending transaction.
///
/// While a guard is alive no other event for the same user can be processed
/// and the staleness sweep leaves the entry alone.
pub struct SessionGuard {
    owner: UserIdentity,
    slot: OwnedMutexGuard<Option<PendingTransaction>>,
}

impl SessionGuard {
    pub fn owner(&self) -> &UserIdentity {
        &self.owner
    }

    pub fn get(&self) -> Option<&PendingTransaction> {
        self.slot.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut PendingTransaction> {
        self.slot.as_mut()
    }

    /// Store a transaction, returning the one it replaced
    pub fn put(&mut self, transaction: PendingTransaction) -> Option<PendingTransaction> {
        debug_assert_eq!(transaction.owner, self.owner);
        self.slot.replace(transaction)
    }

    pub fn remove(&mut self) -> Option<PendingTransaction> {
        self.slot.take()
    }
}

/// Per-user pending transaction store
#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<UserIdentity, Slot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, owner: &UserIdentity) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Lock a user's slot without waiting.
    ///
    /// Returns [`Error::Busy`] if another event for the same user is in flight.
    pub fn try_lock(&self, owner: &UserIdentity) -> Result<SessionGuard> {
        let slot = self.slot(owner);
        let guard = slot
            .try_lock_owned()
            .map_err(|_| Error::Busy(owner.to_string()))?;
        Ok(SessionGuard {
            owner: owner.clone(),
            slot: guard,
        })
    }

    /// Lock a user's slot, waiting behind any in-flight event
    pub async fn lock(&self, owner: &UserIdentity) -> SessionGuard {
        let slot = self.slot(owner);
        SessionGuard {
            owner: owner.clone(),
            slot: slot.lock_owned().await,
        }
    }

    pub async fn get(&self, owner: &UserIdentity) -> Option<PendingTransaction> {
        self.lock(owner).await.get().cloned()
    }

    /// Store a transaction, overwriting any existing one
    pub async fn put(&self, owner: &UserIdentity, transaction: PendingTransaction) {
        self.lock(owner).await.put(transaction);
    }

    pub async fn remove(&self, owner: &UserIdentity) -> Option<PendingTransaction> {
        self.lock(owner).await.remove()
    }

    /// Remove every pending transaction idle for longer than `max_age`.
    ///
    /// Sessions an event is using (or is about to lock) are skipped; they
    /// will be considered again on the next sweep. The sweep itself never
    /// makes [`try_lock`](Self::try_lock) report a user as busy.
    pub fn sweep_expired(&self, max_age: Duration) -> Vec<PendingTransaction> {
        self.sweep_expired_at(max_age, Utc::now())
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock
    pub fn sweep_expired_at(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<PendingTransaction> {
        // New slot handles are only handed out under this lock, so a slot
        // referenced by the map alone cannot be locked or about to be locked.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        let mut expired = Vec::new();
        let mut skipped = 0usize;
        slots.retain(|owner, slot| {
            if Arc::strong_count(slot) > 1 {
                skipped += 1;
                return true;
            }
            let Ok(mut guard) = slot.try_lock() else {
                skipped += 1;
                return true;
            };
            if guard
                .as_ref()
                .is_some_and(|tx| tx.is_stale(max_age, now))
            {
                if let Some(tx) = guard.take() {
                    debug!(owner = %owner, stage = %tx.stage, "Swept stale pending transaction");
                    expired.push(tx);
                }
            }
            // Empty slots are dropped
            guard.is_some()
        });

        if skipped > 0 {
            debug!(skipped, "Sweep skipped sessions in use");
        }
        expired
    }

    /// Number of users with a pending transaction (sessions in use count as pending)
    pub fn pending_count(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .values()
            .filter(|slot| {
                Arc::strong_count(slot) > 1
                    || slot.try_lock().map(|guard| guard.is_some()).unwrap_or(true)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;

    fn user(id: &str) -> UserIdentity {
        UserIdentity::new(id)
    }

    #[tokio::test]
    async fn test_get_put_remove() {
        let store = SessionStore::new();
        let alice = user("alice");
        assert!(store.get(&alice).await.is_none());

        store
            .put(&alice, PendingTransaction::manual(alice.clone(), Utc::now()))
            .await;
        let pending = store.get(&alice).await.unwrap();
        assert_eq!(pending.stage, Stage::AwaitingManualAmount);

        assert!(store.remove(&alice).await.is_some());
        assert!(store.get(&alice).await.is_none());
        // Removing again is a no-op
        assert!(store.remove(&alice).await.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = SessionStore::new();
        let alice = user("alice");
        let mut guard = store.lock(&alice).await;
        assert!(guard
            .put(PendingTransaction::manual(alice.clone(), Utc::now()))
            .is_none());
        let replaced = guard.put(PendingTransaction::manual(alice.clone(), Utc::now()));
        assert!(replaced.is_some());
    }

    #[tokio::test]
    async fn test_try_lock_reports_busy() {
        let store = SessionStore::new();
        let alice = user("alice");
        let bob = user("bob");

        let _held = store.try_lock(&alice).unwrap();
        assert!(matches!(store.try_lock(&alice), Err(Error::Busy(_))));
        // Other users are unaffected
        assert!(store.try_lock(&bob).is_ok());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale() {
        let store = SessionStore::new();
        let now = Utc::now();
        let old = user("old");
        let young = user("young");

        store
            .put(&old, PendingTransaction::manual(old.clone(), now - Duration::minutes(31)))
            .await;
        store
            .put(&young, PendingTransaction::manual(young.clone(), now - Duration::minutes(29)))
            .await;

        let expired = store.sweep_expired_at(Duration::minutes(30), now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].owner, old);
        assert!(store.get(&old).await.is_none());
        assert!(store.get(&young).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_locked_sessions() {
        let store = SessionStore::new();
        let now = Utc::now();
        let alice = user("alice");
        store
            .put(&alice, PendingTransaction::manual(alice.clone(), now - Duration::hours(2)))
            .await;

        let guard = store.try_lock(&alice).unwrap();
        assert!(store.sweep_expired_at(Duration::minutes(30), now).is_empty());
        drop(guard);

        assert_eq!(store.sweep_expired_at(Duration::minutes(30), now).len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_sessions_about_to_be_locked() {
        let store = SessionStore::new();
        let now = Utc::now();
        let alice = user("alice");
        store
            .put(&alice, PendingTransaction::manual(alice.clone(), now - Duration::hours(2)))
            .await;

        // An event has looked up the slot but not locked it yet
        let slot = store.slot(&alice);
        assert!(store.sweep_expired_at(Duration::minutes(30), now).is_empty());
        assert!(slot.try_lock().is_ok());
        assert_eq!(store.pending_count(), 1);
        drop(slot);

        assert_eq!(store.sweep_expired_at(Duration::minutes(30), now).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweeps_never_make_idle_users_busy() {
        let store = Arc::new(SessionStore::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut sweepers = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let stop = stop.clone();
            sweepers.push(tokio::spawn(async move {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    store.sweep_expired(Duration::minutes(30));
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut users = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            users.push(tokio::spawn(async move {
                let owner = user(&format!("user-{}", i));
                let mut busy = 0;
                for _ in 0..200 {
                    match store.try_lock(&owner) {
                        Ok(mut guard) => {
                            guard.put(PendingTransaction::manual(owner.clone(), Utc::now()));
                        }
                        Err(_) => busy += 1,
                    }
                    tokio::task::yield_now().await;
                }
                busy
            }));
        }

        let mut busy = 0;
        for handle in users {
            busy += handle.await.unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for handle in sweepers {
            handle.await.unwrap();
        }
        assert_eq!(busy, 0);
    }

    #[tokio::test]
    async fn test_sweep_prunes_empty_slots() {
        let store = SessionStore::new();
        let alice = user("alice");
        store
            .put(&alice, PendingTransaction::manual(alice.clone(), Utc::now()))
            .await;
        store.remove(&alice).await;
        store.sweep_expired(Duration::minutes(30));
        assert_eq!(store.slots.lock().unwrap().len(), 0);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sweeps_and_activity() {
        let store = Arc::new(SessionStore::new());
        let now = Utc::now();

        for i in 0..50 {
            let owner = user(&format!("user-{}", i));
            // Even users are stale, odd users are fresh
            let age = if i % 2 == 0 { 60 } else { 5 };
            store
                .put(&owner, PendingTransaction::manual(owner.clone(), now - Duration::minutes(age)))
                .await;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.sweep_expired_at(Duration::minutes(30), now).len()
            }));
        }
        for i in (1..50).step_by(2) {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let owner = user(&format!("user-{}", i));
                let mut guard = store.lock(&owner).await;
                if let Some(tx) = guard.get_mut() {
                    tx.touch(now);
                }
                0
            }));
        }

        let mut removed = 0;
        for handle in handles {
            removed += handle.await.unwrap();
        }

        assert_eq!(removed, 25);
        for i in 0..50 {
            let owner = user(&format!("user-{}", i));
            assert_eq!(store.get(&owner).await.is_some(), i % 2 == 1);
        }
    }
}
