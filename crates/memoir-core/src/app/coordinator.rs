//! DeliveryCoordinator - 1 cycle 分の配送
//!
//! # フロー（候補ごとに独立）
//! 1. 期限切れの claim を回収（クラッシュした worker の取り残し）
//! 2. due set を scan（cycle 開始時刻 `now`）
//! 3. 候補ごとに: claim → 再取得 → 送信 → 成功なら mark_delivered / 失敗なら release_claim
//!
//! # 失敗の扱い
//! - 送信失敗（一時的・恒久的・timeout）: claim を解放して次の cycle に任せる。cycle 内で再試行しない
//! - claim 失敗 / 途中で削除: 何もしない（エラーではない）
//! - store 障害: 未着手の候補は始めずに cycle を失敗させる（送信中のものは最後まで処理する）
//!
//! 同じ coordinator の cycle は重ならない（`try_lock` で弾く）。
//! 複数プロセス間の排他は store の claim だけが担う。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::config::SchedulerConfig;
use crate::domain::{
    CapsuleId, Claim, CycleError, CycleReport, DeliveryOutcome, NotifyError, StoreError,
};
use crate::ports::{CapsuleStore, Clock, IdGenerator, Notifier};

use super::scanner::DueSetScanner;

/// Timing and concurrency knobs of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub claim_ttl: chrono::Duration,
    pub send_timeout: Duration,
    pub max_concurrent_sends: usize,
}

impl From<&SchedulerConfig> for DeliverySettings {
    fn from(config: &SchedulerConfig) -> Self {
        let ttl_secs = config.claim_ttl_secs.min(i32::MAX as u64) as i64;
        Self {
            claim_ttl: chrono::Duration::seconds(ttl_secs),
            send_timeout: config.send_timeout(),
            max_concurrent_sends: config.max_concurrent_sends.max(1),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

pub struct DeliveryCoordinator {
    store: Arc<dyn CapsuleStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    scanner: DueSetScanner,
    settings: DeliverySettings,
    running: Mutex<()>,
}

impl DeliveryCoordinator {
    pub fn new(
        store: Arc<dyn CapsuleStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            scanner: DueSetScanner::new(Arc::clone(&store)),
            store,
            notifier,
            clock,
            ids,
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> DeliverySettings {
        self.settings
    }

    /// Run one cycle. Fails with `AlreadyRunning` instead of waiting for a
    /// cycle in progress.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("delivery cycle skipped: previous cycle still running");
            return Err(CycleError::AlreadyRunning);
        };

        let now = self.clock.now();
        match self.cycle(now).await {
            Ok(report) => {
                if report.is_idle() {
                    tracing::debug!(at = %now, "delivery cycle idle");
                } else {
                    tracing::info!(
                        at = %now,
                        scanned = report.scanned,
                        reaped = report.reaped,
                        delivered = report.delivered,
                        transient_failures = report.transient_failures,
                        permanent_failures = report.permanent_failures,
                        claim_lost = report.claim_lost,
                        vanished = report.vanished,
                        "delivery cycle finished"
                    );
                }
                Ok(report)
            }
            Err((err, report)) => {
                tracing::error!(
                    at = %now,
                    error = %err,
                    scanned = report.scanned,
                    delivered = report.delivered,
                    aborted = report.aborted,
                    "delivery cycle aborted by store failure"
                );
                Err(CycleError::Store(err))
            }
        }
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, (StoreError, CycleReport)> {
        let mut report = CycleReport::default();

        report.reaped = self
            .store
            .reap_expired_claims(now)
            .await
            .map_err(|e| (e, report.clone()))?;
        if report.reaped > 0 {
            tracing::warn!(reaped = report.reaped, "returned expired claims to pending");
        }

        let candidates = self
            .scanner
            .scan(now)
            .await
            .map_err(|e| (e, report.clone()))?;
        report.scanned = candidates.len();

        let abort = AtomicBool::new(false);
        let results: Vec<(CapsuleId, Result<DeliveryOutcome, StoreError>)> =
            stream::iter(candidates)
                .map(|id| {
                    let abort = &abort;
                    async move {
                        if abort.load(Ordering::SeqCst) {
                            return (id, Ok(DeliveryOutcome::Aborted));
                        }
                        let result = self.deliver(id).await;
                        if result.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        (id, result)
                    }
                })
                .buffer_unordered(self.settings.max_concurrent_sends)
                .collect()
                .await;

        let mut store_error = None;
        for (id, result) in results {
            match result {
                Ok(outcome) => report.record(id, outcome),
                Err(err) => {
                    tracing::error!(capsule_id = %id, error = %err, "store failure during delivery");
                    report.record(id, DeliveryOutcome::Aborted);
                    store_error.get_or_insert(err);
                }
            }
        }

        match store_error {
            Some(err) => Err((err, report)),
            None => Ok(report),
        }
    }

    /// Process one candidate. `Err` only for store failures.
    async fn deliver(&self, id: CapsuleId) -> Result<DeliveryOutcome, StoreError> {
        let claimed_at = self.clock.now();
        let claim = Claim::lasting(
            id,
            self.ids.generate_claim_token(),
            claimed_at,
            self.settings.claim_ttl,
        );
        if !self.store.claim(&claim, claimed_at).await? {
            tracing::debug!(capsule_id = %id, "claim lost, skipping");
            return Ok(DeliveryOutcome::ClaimLost);
        }

        // scan 時点のコピーは古い可能性があるので claim 後に読み直す
        let Some(capsule) = self.store.get(id).await? else {
            tracing::debug!(capsule_id = %id, "capsule deleted before send");
            return Ok(DeliveryOutcome::Vanished);
        };

        let email = capsule.to_outgoing();
        let sent = match tokio::time::timeout(self.settings.send_timeout, self.notifier.send(&email))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::transient(format!(
                "send timed out after {}s",
                self.settings.send_timeout.as_secs_f64()
            ))),
        };

        match sent {
            Ok(()) => {
                if self.store.mark_delivered(&claim, self.clock.now()).await? {
                    tracing::info!(
                        capsule_id = %id,
                        owner_id = %capsule.owner_id,
                        attempts = capsule.attempts,
                        "capsule delivered"
                    );
                    Ok(DeliveryOutcome::Delivered)
                } else {
                    tracing::warn!(
                        capsule_id = %id,
                        "email sent but capsule was deleted or taken over before commit"
                    );
                    Ok(DeliveryOutcome::Vanished)
                }
            }
            Err(err) => {
                let reason = err.to_string();
                let released = self
                    .store
                    .release_claim(&claim, self.clock.now(), Some(&reason))
                    .await?;
                if err.is_permanent() {
                    tracing::error!(
                        capsule_id = %id,
                        attempts = capsule.attempts,
                        error = %err,
                        "permanent send failure, will retry next cycle"
                    );
                } else {
                    tracing::warn!(
                        capsule_id = %id,
                        attempts = capsule.attempts,
                        error = %err,
                        "send failed, will retry next cycle"
                    );
                }
                if !released {
                    tracing::debug!(capsule_id = %id, "claim already gone on release");
                }
                Ok(DeliveryOutcome::from_failure(err.kind()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::domain::{
        Capsule, CapsulePatch, CapsuleStatus, ClaimToken, EditOutcome, NewCapsule, OwnerId,
        StoreCounts,
    };
    use crate::impls::{InMemoryCapsuleStore, RecordingNotifier, SqliteCapsuleStore};
    use crate::ports::{FixedClock, UlidGenerator};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, 12, 0, 0).unwrap()
    }

    fn draft(recipient: &str, deliver_at: DateTime<Utc>) -> NewCapsule {
        NewCapsule {
            title: "Summer".into(),
            recipient: recipient.into(),
            subject: "A letter from last year".into(),
            message: "Remember the lake?".into(),
            media: vec![],
            deliver_at,
        }
    }

    fn capsule(recipient: &str, deliver_at: DateTime<Utc>) -> Capsule {
        Capsule::new(
            CapsuleId::generate(),
            OwnerId::generate(),
            draft(recipient, deliver_at),
            t0() - chrono::Duration::days(30),
        )
    }

    fn coordinator(
        store: Arc<dyn CapsuleStore>,
        notifier: Arc<RecordingNotifier>,
        clock: &FixedClock,
        settings: DeliverySettings,
    ) -> DeliveryCoordinator {
        DeliveryCoordinator::new(
            store,
            notifier,
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock.clone())),
            settings,
        )
    }

    struct Harness {
        store: Arc<InMemoryCapsuleStore>,
        notifier: Arc<RecordingNotifier>,
        clock: FixedClock,
        coordinator: DeliveryCoordinator,
    }

    fn harness_with(settings: DeliverySettings) -> Harness {
        let store = Arc::new(InMemoryCapsuleStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = FixedClock::new(t0());
        let coordinator = coordinator(store.clone(), notifier.clone(), &clock, settings);
        Harness {
            store,
            notifier,
            clock,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with(DeliverySettings::default())
    }

    #[tokio::test]
    async fn overdue_capsule_is_sent_once_and_marked_delivered() {
        let h = harness();
        let c = capsule("friend@example.com", t0() - chrono::Duration::minutes(1));
        let id = c.id;
        h.store.insert(c).await.unwrap();

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.delivered_ids, vec![id]);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "friend@example.com");
        assert_eq!(sent[0].subject, "A letter from last year");
        assert_eq!(sent[0].body, "Remember the lake?");

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CapsuleStatus::Delivered);
        assert_eq!(stored.delivered_at, Some(t0()));
        assert!(stored.claim.is_none());

        let again = h.coordinator.run_cycle().await.unwrap();
        assert!(again.is_idle());
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn future_capsule_waits_for_its_time() {
        let h = harness();
        h.store
            .insert(capsule("later@example.com", t0() + chrono::Duration::minutes(10)))
            .await
            .unwrap();

        assert_eq!(h.coordinator.run_cycle().await.unwrap().scanned, 0);
        h.clock.advance(chrono::Duration::minutes(9));
        assert_eq!(h.coordinator.run_cycle().await.unwrap().scanned, 0);
        h.clock.advance(chrono::Duration::minutes(1));
        assert_eq!(h.coordinator.run_cycle().await.unwrap().delivered, 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_capsule_pending_for_next_cycle() {
        let h = harness();
        let c = capsule("flaky@example.com", t0());
        let id = c.id;
        h.store.insert(c).await.unwrap();
        h.notifier.fail_next(NotifyError::transient("421 service not available"));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.transient_failures, 1);
        assert_eq!(report.delivered, 0);

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CapsuleStatus::Pending);
        assert!(stored.claim.is_none());
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.as_deref().unwrap_or_default().contains("421"));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 1);
        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CapsuleStatus::Delivered);
        assert_eq!(stored.attempts, 2);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn permanent_failure_is_classified_and_retried_each_cycle() {
        let h = harness();
        let c = capsule("gone@example.com", t0());
        let id = c.id;
        h.store.insert(c).await.unwrap();
        h.notifier
            .fail_address("gone@example.com", NotifyError::permanent("550 mailbox unavailable"));

        for attempt in 1..=2 {
            let report = h.coordinator.run_cycle().await.unwrap();
            assert_eq!(report.permanent_failures, 1);
            assert_eq!(report.transient_failures, 0);
            let stored = h.store.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status, CapsuleStatus::Pending);
            assert_eq!(stored.attempts, attempt);
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let h = harness();
        for to in ["a@example.com", "bounce@example.com", "c@example.com"] {
            h.store.insert(capsule(to, t0())).await.unwrap();
        }
        h.notifier
            .fail_address("bounce@example.com", NotifyError::permanent("no such user"));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures(), 1);
        assert_eq!(h.store.counts(t0()).await.unwrap().delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out_as_transient_failure() {
        let h = harness_with(DeliverySettings {
            send_timeout: Duration::from_secs(30),
            ..DeliverySettings::default()
        });
        let c = capsule("slow@example.com", t0());
        let id = c.id;
        h.store.insert(c).await.unwrap();
        h.notifier.set_delay(Duration::from_secs(120));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.transient_failures, 1);
        assert!(h.notifier.sent().is_empty());

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CapsuleStatus::Pending);
        assert!(stored.claim.is_none());
        assert!(stored.last_error.unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn idle_cycles_send_and_mutate_nothing() {
        let h = harness();
        h.store
            .insert(capsule("future@example.com", t0() + chrono::Duration::days(365)))
            .await
            .unwrap();
        let before = h.store.all().await;

        for _ in 0..3 {
            let report = h.coordinator.run_cycle().await.unwrap();
            assert!(report.is_idle());
            assert_eq!(report, CycleReport::default());
        }
        assert_eq!(h.store.all().await, before);
        assert_eq!(h.notifier.attempts(), 0);
    }

    #[tokio::test]
    async fn store_outage_fails_the_cycle_but_not_the_next_one() {
        let h = harness();
        h.store.insert(capsule("x@example.com", t0())).await.unwrap();

        h.store.set_unavailable(true);
        assert!(matches!(
            h.coordinator.run_cycle().await,
            Err(CycleError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(h.notifier.attempts(), 0);

        h.store.set_unavailable(false);
        assert_eq!(h.coordinator.run_cycle().await.unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn stale_claim_from_crashed_worker_is_reaped_and_delivered() {
        let h = harness();
        let c = capsule("patient@example.com", t0());
        let id = c.id;
        h.store.insert(c).await.unwrap();
        let crashed = Claim::lasting(id, ClaimToken::generate(), t0(), chrono::Duration::minutes(5));
        assert!(h.store.claim(&crashed, t0()).await.unwrap());

        assert_eq!(h.coordinator.run_cycle().await.unwrap().scanned, 0);

        h.clock.advance(chrono::Duration::minutes(5));
        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.reaped, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_cycle_on_same_coordinator_is_refused() {
        let h = harness();
        h.store.insert(capsule("a@example.com", t0())).await.unwrap();
        h.notifier.set_delay(Duration::from_secs(5));

        let (first, second) = tokio::join!(h.coordinator.run_cycle(), async {
            tokio::task::yield_now().await;
            h.coordinator.run_cycle().await
        });
        assert_eq!(first.unwrap().delivered, 1);
        assert!(matches!(second, Err(CycleError::AlreadyRunning)));
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_bounded_by_max_concurrency() {
        let h = harness_with(DeliverySettings {
            max_concurrent_sends: 2,
            ..DeliverySettings::default()
        });
        for i in 0..6 {
            h.store
                .insert(capsule(&format!("user{i}@example.com"), t0()))
                .await
                .unwrap();
        }
        h.notifier.set_delay(Duration::from_secs(1));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 6);
        assert_eq!(h.notifier.peak_concurrency(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn two_coordinators_racing_deliver_once() {
        let store = Arc::new(InMemoryCapsuleStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.set_delay(Duration::from_secs(1));
        let clock = FixedClock::new(t0());
        store.insert(capsule("once@example.com", t0())).await.unwrap();

        let a = coordinator(store.clone(), notifier.clone(), &clock, DeliverySettings::default());
        let b = coordinator(store.clone(), notifier.clone(), &clock, DeliverySettings::default());
        let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.delivered + rb.delivered, 1);
        assert_eq!(notifier.attempts(), 1);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_workers_deliver_every_capsule_exactly_once() {
        let store = Arc::new(InMemoryCapsuleStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = FixedClock::new(t0());
        for i in 0..40 {
            store
                .insert(capsule(&format!("user{i}@example.com"), t0()))
                .await
                .unwrap();
        }

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::new(coordinator(
                    store.clone(),
                    notifier.clone(),
                    &clock,
                    DeliverySettings::default(),
                ));
                tokio::spawn(async move { coordinator.run_cycle().await })
            })
            .collect();
        let mut delivered = 0;
        for worker in workers {
            delivered += worker.await.unwrap().unwrap().delivered;
        }

        assert_eq!(delivered, 40);
        let mut per_recipient: HashMap<String, usize> = HashMap::new();
        for email in notifier.sent() {
            *per_recipient.entry(email.to).or_default() += 1;
        }
        assert_eq!(per_recipient.len(), 40);
        assert!(per_recipient.values().all(|&n| n == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn processes_sharing_a_sqlite_file_deliver_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let first = Arc::new(SqliteCapsuleStore::open(&path).unwrap());
        let second = Arc::new(SqliteCapsuleStore::open(&path).unwrap());
        for i in 0..10 {
            first
                .insert(capsule(&format!("user{i}@example.com"), t0()))
                .await
                .unwrap();
        }
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = FixedClock::new(t0());

        let a = coordinator(first.clone(), notifier.clone(), &clock, DeliverySettings::default());
        let b = coordinator(second.clone(), notifier.clone(), &clock, DeliverySettings::default());
        let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());

        assert_eq!(ra.unwrap().delivered + rb.unwrap().delivered, 10);
        assert_eq!(notifier.sent().len(), 10);
        assert_eq!(second.counts(t0()).await.unwrap().delivered, 10);
    }

    /// When the hook fires, relative to the coordinator's calls.
    #[derive(Clone, Copy)]
    enum DeleteHook {
        AfterScan,
        AfterClaim,
    }

    /// Deletes every capsule of `owner` at a chosen point of the cycle.
    struct DeletingStore {
        inner: InMemoryCapsuleStore,
        hook: DeleteHook,
    }

    impl DeletingStore {
        async fn delete_all(&self) {
            for capsule in self.inner.all().await {
                self.inner
                    .delete_owned(capsule.owner_id, capsule.id)
                    .await
                    .unwrap();
            }
        }
    }

    #[async_trait]
    impl CapsuleStore for DeletingStore {
        async fn insert(&self, capsule: Capsule) -> Result<(), StoreError> {
            self.inner.insert(capsule).await
        }
        async fn get(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
            self.inner.get(id).await
        }
        async fn get_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
            self.inner.get_owned(owner, id).await
        }
        async fn list_owned(&self, owner: OwnerId) -> Result<Vec<Capsule>, StoreError> {
            self.inner.list_owned(owner).await
        }
        async fn update_owned(
            &self,
            owner: OwnerId,
            id: CapsuleId,
            patch: &CapsulePatch,
            now: DateTime<Utc>,
        ) -> Result<EditOutcome, StoreError> {
            self.inner.update_owned(owner, id, patch, now).await
        }
        async fn delete_owned(&self, owner: OwnerId, id: CapsuleId) -> Result<bool, StoreError> {
            self.inner.delete_owned(owner, id).await
        }
        async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Capsule>, StoreError> {
            let due = self.inner.find_due(now).await?;
            if matches!(self.hook, DeleteHook::AfterScan) {
                self.delete_all().await;
            }
            Ok(due)
        }
        async fn claim(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
            let claimed = self.inner.claim(claim, now).await?;
            if matches!(self.hook, DeleteHook::AfterClaim) {
                self.delete_all().await;
            }
            Ok(claimed)
        }
        async fn mark_delivered(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.mark_delivered(claim, now).await
        }
        async fn release_claim(
            &self,
            claim: &Claim,
            now: DateTime<Utc>,
            reason: Option<&str>,
        ) -> Result<bool, StoreError> {
            self.inner.release_claim(claim, now, reason).await
        }
        async fn reap_expired_claims(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.reap_expired_claims(now).await
        }
        async fn counts(&self, now: DateTime<Utc>) -> Result<StoreCounts, StoreError> {
            self.inner.counts(now).await
        }
    }

    async fn run_with_hook(hook: DeleteHook) -> (CycleReport, Arc<RecordingNotifier>) {
        let store = Arc::new(DeletingStore {
            inner: InMemoryCapsuleStore::new(),
            hook,
        });
        store.insert(capsule("ghost@example.com", t0())).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = FixedClock::new(t0());
        let coordinator = coordinator(store, notifier.clone(), &clock, DeliverySettings::default());
        (coordinator.run_cycle().await.unwrap(), notifier)
    }

    #[tokio::test]
    async fn capsule_deleted_between_scan_and_claim_is_skipped() {
        let (report, notifier) = run_with_hook(DeleteHook::AfterScan).await;
        assert_eq!(report.scanned, 1);
        assert_eq!(report.claim_lost, 1);
        assert_eq!(notifier.attempts(), 0);
    }

    #[tokio::test]
    async fn capsule_deleted_after_claim_is_not_sent() {
        let (report, notifier) = run_with_hook(DeleteHook::AfterClaim).await;
        assert_eq!(report.vanished, 1);
        assert_eq!(notifier.attempts(), 0);
    }

    #[test]
    fn settings_follow_scheduler_config() {
        let config = SchedulerConfig {
            claim_ttl_secs: 120,
            send_timeout_secs: 10,
            max_concurrent_sends: 8,
            ..SchedulerConfig::default()
        };
        let settings = DeliverySettings::from(&config);
        assert_eq!(settings.claim_ttl, chrono::Duration::minutes(2));
        assert_eq!(settings.send_timeout, Duration::from_secs(10));
        assert_eq!(settings.max_concurrent_sends, 8);
    }
}
