//! In-memory capsule store.
//!
//! Single-process only: the tokio `Mutex` is the atomicity boundary, so every
//! operation below is atomic per record (in fact per store). Used by tests and
//! by deployments configured with `store.path = ":memory:"`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Capsule, CapsuleId, CapsulePatch, Claim, EditOutcome, OwnerId, StoreCounts, StoreError,
};
use crate::ports::CapsuleStore;

/// In-memory store state. `records` is the single source of truth.
#[derive(Default)]
struct InMemoryStoreState {
    records: HashMap<CapsuleId, Capsule>,
}

impl InMemoryStoreState {
    fn owned_mut(&mut self, owner: OwnerId, id: CapsuleId) -> Option<&mut Capsule> {
        self.records
            .get_mut(&id)
            .filter(|capsule| capsule.owner_id == owner)
    }

    fn counts(&self, now: DateTime<Utc>) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for capsule in self.records.values() {
            if capsule.status.is_terminal() {
                counts.delivered += 1;
            } else if capsule.has_live_claim(now) {
                counts.claimed += 1;
            } else {
                counts.pending += 1;
            }
        }
        counts
    }
}

#[derive(Default)]
pub struct InMemoryCapsuleStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    unavailable: AtomicBool,
}

impl InMemoryCapsuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }

    /// Simulate an outage: every operation fails with `StoreError::Unavailable`.
    #[cfg(test)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of every record (for testing)
    #[cfg(test)]
    pub async fn all(&self) -> Vec<Capsule> {
        let state = self.state.lock().await;
        state.records.values().cloned().collect()
    }
}

#[async_trait]
impl CapsuleStore for InMemoryCapsuleStore {
    async fn insert(&self, capsule: Capsule) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.records.insert(capsule.id, capsule);
        Ok(())
    }

    async fn get(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn get_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&id)
            .filter(|capsule| capsule.owner_id == owner)
            .cloned())
    }

    async fn list_owned(&self, owner: OwnerId) -> Result<Vec<Capsule>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut owned: Vec<Capsule> = state
            .records
            .values()
            .filter(|capsule| capsule.owner_id == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(owned)
    }

    async fn update_owned(
        &self,
        owner: OwnerId,
        id: CapsuleId,
        patch: &CapsulePatch,
        now: DateTime<Utc>,
    ) -> Result<EditOutcome, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(capsule) = state.owned_mut(owner, id) else {
            return Ok(EditOutcome::NotFound);
        };
        Ok(capsule.apply_edit(patch, now))
    }

    async fn delete_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.owned_mut(owner, id).is_none() {
            return Ok(false);
        }
        Ok(state.records.remove(&id).is_some())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Capsule>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|capsule| capsule.is_claimable(now))
            .cloned()
            .collect())
    }

    async fn claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .records
            .get_mut(&claim.capsule_id)
            .is_some_and(|capsule| capsule.try_claim(claim, now)))
    }

    async fn mark_delivered(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .records
            .get_mut(&claim.capsule_id)
            .is_some_and(|capsule| capsule.commit_delivery(claim.token, now)))
    }

    async fn release_claim(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .records
            .get_mut(&claim.capsule_id)
            .is_some_and(|capsule| capsule.release_claim(claim.token, now, reason)))
    }

    async fn reap_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .records
            .values_mut()
            .map(|capsule| capsule.reap_claim(now))
            .filter(|reaped| *reaped)
            .count())
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<StoreCounts, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.counts(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CapsuleStatus, ClaimToken, NewCapsule};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn capsule(owner: OwnerId, deliver_at: DateTime<Utc>) -> Capsule {
        let draft = NewCapsule {
            title: "note".into(),
            recipient: "someone@example.com".into(),
            subject: "subject".into(),
            message: "body".into(),
            media: vec![],
            deliver_at,
        };
        Capsule::new(CapsuleId::generate(), owner, draft, t0())
    }

    fn claim(id: CapsuleId, now: DateTime<Utc>) -> Claim {
        Claim::lasting(id, ClaimToken::generate(), now, Duration::minutes(5))
    }

    #[tokio::test]
    async fn find_due_excludes_future_and_claimed() {
        let store = InMemoryCapsuleStore::new();
        let owner = OwnerId::generate();
        let due = capsule(owner, t0() - Duration::minutes(1));
        let future = capsule(owner, t0() + Duration::minutes(1));
        let claimed = capsule(owner, t0() - Duration::minutes(2));
        let (due_id, claimed_id) = (due.id, claimed.id);
        for c in [due, future, claimed] {
            store.insert(c).await.unwrap();
        }
        assert!(store.claim(&claim(claimed_id, t0()), t0()).await.unwrap());

        let found: Vec<CapsuleId> = store.find_due(t0()).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(found, vec![due_id]);
    }

    #[tokio::test]
    async fn second_claim_fails_deterministically() {
        let store = InMemoryCapsuleStore::new();
        let c = capsule(OwnerId::generate(), t0());
        let id = c.id;
        store.insert(c).await.unwrap();

        assert!(store.claim(&claim(id, t0()), t0()).await.unwrap());
        assert!(!store.claim(&claim(id, t0()), t0()).await.unwrap());

        let counts = store.counts(t0()).await.unwrap();
        assert_eq!(counts.claimed, 1);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn claim_on_missing_record_is_false() {
        let store = InMemoryCapsuleStore::new();
        let ghost = claim(CapsuleId::generate(), t0());
        assert!(!store.claim(&ghost, t0()).await.unwrap());
        assert!(!store.mark_delivered(&ghost, t0()).await.unwrap());
        assert!(!store.release_claim(&ghost, t0(), None).await.unwrap());
    }

    #[tokio::test]
    async fn mark_delivered_then_counts() {
        let store = InMemoryCapsuleStore::new();
        let c = capsule(OwnerId::generate(), t0());
        let id = c.id;
        store.insert(c).await.unwrap();
        let held = claim(id, t0());
        assert!(store.claim(&held, t0()).await.unwrap());

        assert!(store.mark_delivered(&held, t0()).await.unwrap());
        assert!(!store.mark_delivered(&held, t0()).await.unwrap());

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CapsuleStatus::Delivered);
        assert_eq!(store.counts(t0()).await.unwrap().delivered, 1);
        assert!(store.find_due(t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_claims_are_reaped() {
        let store = InMemoryCapsuleStore::new();
        let c = capsule(OwnerId::generate(), t0());
        let id = c.id;
        store.insert(c).await.unwrap();
        let held = claim(id, t0());
        assert!(store.claim(&held, t0()).await.unwrap());

        assert_eq!(store.reap_expired_claims(t0()).await.unwrap(), 0);
        assert_eq!(store.reap_expired_claims(held.expires_at).await.unwrap(), 1);
        assert_eq!(store.find_due(held.expires_at).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_scoping() {
        let store = InMemoryCapsuleStore::new();
        let alice = OwnerId::generate();
        let mallory = OwnerId::generate();
        let c = capsule(alice, t0() + Duration::days(1));
        let id = c.id;
        store.insert(c).await.unwrap();

        assert!(store.get_owned(mallory, id).await.unwrap().is_none());
        assert!(store.list_owned(mallory).await.unwrap().is_empty());
        let patch = CapsulePatch {
            subject: Some("hijacked".into()),
            ..CapsulePatch::default()
        };
        assert_eq!(
            store.update_owned(mallory, id, &patch, t0()).await.unwrap(),
            EditOutcome::NotFound
        );
        assert!(!store.delete_owned(mallory, id).await.unwrap());

        assert!(store.get_owned(alice, id).await.unwrap().is_some());
        assert!(store.delete_owned(alice, id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryCapsuleStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_due(t0()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.find_due(t0()).await.unwrap().is_empty());
    }
}
