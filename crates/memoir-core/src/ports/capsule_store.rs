//! CapsuleStore port - capsule レコードの正本（source of truth）
//!
//! # 設計原則
//! - 状態遷移（claim / commit / release / reap）は 1 レコード単位で原子的
//! - claim の権威はここにある（scan の結果は「候補」に過ぎない）
//! - 複数プロセスが同じ store を共有しても、claim が唯一の排他点になる
//! - レコードをまたぐトランザクションは要求しない

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Capsule, CapsuleId, CapsulePatch, Claim, EditOutcome, OwnerId, StoreCounts, StoreError,
};

#[async_trait]
pub trait CapsuleStore: Send + Sync {
    // ---- owner-facing CRUD (consumed by the API layer) ----

    async fn insert(&self, capsule: Capsule) -> Result<(), StoreError>;

    /// Fetch regardless of owner. Reserved for the delivery path.
    async fn get(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError>;

    /// Fetch only if `owner` owns the capsule.
    async fn get_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<Option<Capsule>, StoreError>;

    /// All capsules of `owner`, newest first.
    async fn list_owned(&self, owner: OwnerId) -> Result<Vec<Capsule>, StoreError>;

    /// Apply `patch` atomically if the capsule is owned, pending and not in flight.
    async fn update_owned(
        &self,
        owner: OwnerId,
        id: CapsuleId,
        patch: &CapsulePatch,
        now: DateTime<Utc>,
    ) -> Result<EditOutcome, StoreError>;

    /// Delete regardless of status. Returns false if not found / not owned.
    async fn delete_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<bool, StoreError>;

    // ---- delivery path ----

    /// Pending capsules with `deliver_at <= now` that no live claim holds.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Capsule>, StoreError>;

    /// Atomically take `claim` if the capsule is pending, due and unclaimed
    /// (an expired claim counts as unclaimed). Returns false otherwise.
    async fn claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// `pending -> delivered`, unless the record is gone, already delivered, or
    /// held by a different claimant.
    async fn mark_delivered(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Return a claimed record to pending. Only the holder of `claim` can release it.
    async fn release_claim(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Clear every claim whose deadline passed. Returns how many were cleared.
    async fn reap_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn counts(&self, now: DateTime<Utc>) -> Result<StoreCounts, StoreError>;
}
