//! Notifier port - 1 通のメールを 1 つの宛先に送る
//!
//! リトライは持たない純粋な transport です。store には触りません。
//! 失敗は `NotifyError` の `ErrorKind`（Transient / Permanent）で分類して返します。

use async_trait::async_trait;

use crate::domain::{NotifyError, OutgoingEmail};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError>;
}
