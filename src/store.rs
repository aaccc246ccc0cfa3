//! Per-contact conversation state storage and turn serialization.
//!
//! The [`StateStore`] owns the only shared mutable resource in the system:
//! each contact's pending next state and append-only history. The engine
//! references this record, it never owns it - retention is the store's
//! policy.
//!
//! # The Serialization Requirement
//!
//! Plain get-then-set access to the pending slot is a latent race: two
//! concurrent inbound events for the same contact could both observe a
//! pending state and both drain it, losing or duplicating transitions.
//! [`ContactLocks`] provides the required per-contact mutual exclusion; the
//! runner holds a contact's lock for the whole turn. Stores fronted by
//! their own serialization (an actor, a single-writer queue) satisfy the
//! same requirement.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::ContactId;
use crate::state::StateRef;

// =============================================================================
// State Store Trait
// =============================================================================

/// Persisted per-contact slots for "pending next state" and the history of
/// past states.
///
/// The interface is infallible by contract: a fallible backend (database,
/// cache service) is expected to retry or degrade behind it rather than
/// surface transport errors into the drain loop.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// The contact's pending next state, if one is queued.
    async fn next_state(&self, contact_id: &ContactId) -> Option<StateRef>;

    /// Set or clear the contact's pending next state.
    async fn set_next_state(&self, contact_id: &ContactId, state: Option<StateRef>);

    /// Append a state to the contact's history. History is append-only;
    /// entries are never removed or reordered.
    async fn push_past_state(&self, contact_id: &ContactId, state: StateRef);

    /// The most recently executed state, if the contact has any history.
    async fn last_state(&self, contact_id: &ContactId) -> Option<StateRef>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Default)]
struct ContactRecord {
    next: Option<StateRef>,
    past: Vec<StateRef>,
}

/// Reference [`StateStore`] backed by a concurrent map.
///
/// Records are created on first interaction and kept for the life of the
/// process. Suitable for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStateStore {
    records: DashMap<ContactId, ContactRecord>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a contact's history, oldest first.
    pub fn past_states(&self, contact_id: &ContactId) -> Vec<StateRef> {
        self.records
            .get(contact_id)
            .map(|r| r.past.clone())
            .unwrap_or_default()
    }

    /// Number of contacts with a record.
    pub fn contact_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn next_state(&self, contact_id: &ContactId) -> Option<StateRef> {
        self.records.get(contact_id).and_then(|r| r.next.clone())
    }

    async fn set_next_state(&self, contact_id: &ContactId, state: Option<StateRef>) {
        self.records.entry(contact_id.clone()).or_default().next = state;
    }

    async fn push_past_state(&self, contact_id: &ContactId, state: StateRef) {
        self.records
            .entry(contact_id.clone())
            .or_default()
            .past
            .push(state);
    }

    async fn last_state(&self, contact_id: &ContactId) -> Option<StateRef> {
        self.records
            .get(contact_id)
            .and_then(|r| r.past.last().cloned())
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("contact_count", &self.records.len())
            .finish()
    }
}

// =============================================================================
// Contact Locks
// =============================================================================

/// Per-contact turn locks.
///
/// Holding a contact's guard for the duration of a turn makes the
/// resolve-and-drain loop atomic with respect to other inbound events for
/// the same contact. Different contacts never contend.
///
/// Lock entries are created on first interaction and kept for the life of
/// the process, matching the store's record lifetime.
#[derive(Default)]
pub struct ContactLocks {
    locks: DashMap<ContactId, Arc<Mutex<()>>>,
}

impl ContactLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the turn lock for a contact, waiting behind any turn already
    /// in flight for the same contact.
    pub async fn acquire(&self, contact_id: &ContactId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(contact_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

impl std::fmt::Debug for ContactLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactLocks")
            .field("contact_count", &self.locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedState;
    use std::time::Duration;

    fn state(label: &'static str) -> StateRef {
        Arc::new(ScriptedState::new(label))
    }

    fn contact(id: &str) -> ContactId {
        ContactId::new(id)
    }

    #[tokio::test]
    async fn test_pending_slot_set_get_clear() {
        let store = InMemoryStateStore::new();
        let c = contact("c1");

        assert!(store.next_state(&c).await.is_none());

        let s = state("s");
        store.set_next_state(&c, Some(s.clone())).await;
        let pending = store.next_state(&c).await.unwrap();
        assert!(Arc::ptr_eq(&pending, &s));

        store.set_next_state(&c, None).await;
        assert!(store.next_state(&c).await.is_none());
    }

    #[tokio::test]
    async fn test_history_is_append_only_most_recent_last() {
        let store = InMemoryStateStore::new();
        let c = contact("c1");
        let (a, b) = (state("a"), state("b"));

        store.push_past_state(&c, a.clone()).await;
        store.push_past_state(&c, b.clone()).await;

        let past = store.past_states(&c);
        assert_eq!(past.len(), 2);
        assert!(Arc::ptr_eq(&past[0], &a));
        assert!(Arc::ptr_eq(&past[1], &b));

        let last = store.last_state(&c).await.unwrap();
        assert!(Arc::ptr_eq(&last, &b));
    }

    #[tokio::test]
    async fn test_contacts_are_partitioned() {
        let store = InMemoryStateStore::new();
        store.push_past_state(&contact("c1"), state("a")).await;

        assert!(store.last_state(&contact("c2")).await.is_none());
        assert_eq!(store.contact_count(), 1);
    }

    #[tokio::test]
    async fn test_contact_lock_excludes_same_contact() {
        let locks = Arc::new(ContactLocks::new());
        let c = contact("c1");

        let guard = locks.acquire(&c).await;

        let locks2 = locks.clone();
        let c2 = c.clone();
        let waiter = tokio::spawn(async move {
            let _guard = locks2.acquire(&c2).await;
        });

        // the second acquire must block while the first guard is held
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter acquires after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_contact_lock_allows_different_contacts() {
        let locks = ContactLocks::new();
        let _g1 = locks.acquire(&contact("c1")).await;
        // must not deadlock
        let _g2 = tokio::time::timeout(Duration::from_millis(100), locks.acquire(&contact("c2")))
            .await
            .expect("different contact acquires immediately");
    }
}
