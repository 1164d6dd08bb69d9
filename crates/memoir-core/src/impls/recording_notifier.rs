//! RecordingNotifier - テスト用の Notifier
//!
//! 送信内容を記録し、失敗や遅延を台本どおりに起こします。
//! - `fail_next`: 次の N 回の送信を順に失敗させる
//! - `fail_address`: 特定の宛先への送信を常に失敗させる
//! - `set_delay`: 各送信の前に待つ（timeout の検証用）
//! - `peak_concurrency`: 同時に送信中だった数の最大値

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{NotifyError, OutgoingEmail};
use crate::ports::Notifier;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutgoingEmail>>,
    scripted: Mutex<VecDeque<NotifyError>>,
    failing_addresses: Mutex<HashMap<String, NotifyError>>,
    delay: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the in-flight count even when the send future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next send, whatever its address.
    pub fn fail_next(&self, error: NotifyError) {
        lock(&self.scripted).push_back(error);
    }

    pub fn fail_address(&self, address: impl Into<String>, error: NotifyError) {
        lock(&self.failing_addresses).insert(address.into(), error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Successfully sent messages, in completion order.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }

    /// Sends started, including failed and cancelled ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_in_flight, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.scripted).pop_front() {
            return Err(error);
        }
        if let Some(error) = lock(&self.failing_addresses).get(&email.to) {
            return Err(error.clone());
        }

        lock(&self.sent).push(email.clone());
        Ok(())
    }
}
