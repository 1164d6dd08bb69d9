//! SchedulerLoop - 一定間隔で delivery cycle を起動する
//!
//! - 最初の tick は起動直後
//! - cycle が interval より長引いた場合、取りこぼした tick はまとめて撃たずに捨てる
//! - cycle の失敗（store 障害など）でループは止まらない
//! - `SchedulerHandle` の shutdown で停止。実行中の cycle は最後まで走らせる

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::CycleError;

use super::coordinator::DeliveryCoordinator;

pub struct SchedulerLoop {
    coordinator: Arc<DeliveryCoordinator>,
    interval: Duration,
}

/// Handle of a spawned loop.
/// - `shutdown_tx` を drop してもループは止まる
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerLoop {
    pub fn new(coordinator: Arc<DeliveryCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    /// Run until shutdown is requested (or every sender is dropped).
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "scheduler started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.coordinator.run_cycle().await {
                Ok(_) => {}
                // coordinator が詳細をログ済み
                Err(CycleError::Store(_)) => {}
                Err(CycleError::AlreadyRunning) => {
                    tracing::debug!("tick skipped: cycle triggered elsewhere is still running");
                }
            }
        }

        tracing::info!("scheduler stopped");
    }
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for the in-flight cycle (if any) to finish.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "scheduler task panicked");
        }
    }
}
