//! Errors - エラー型と分類
//!
//! # 分類
//! - **送信失敗**（`NotifyError`）: 一時的（Transient）か恒久的（Permanent）か。どちらも claim を解放して次の cycle で再試行
//! - **store 障害**（`StoreError`）: その cycle は中断。ループ自体は止めない
//! - **API 操作の失敗**（`CapsuleError`）: 入力検証・所有者不一致・配送済みへの編集など
//! - **cycle の失敗**（`CycleError`）: store 障害、または cycle の重複起動

use std::fmt;

use thiserror::Error;

use super::ids::CapsuleId;

/// ErrorKind は送信エラーの分類
///
/// - Transient: 一時的なエラー（ネットワーク・プロバイダ障害、timeout）
/// - Permanent: 恒久的なエラー（宛先不正など。再試行しても成功しない見込み）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Failure reported by a `Notifier`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} send failure: {message}")]
pub struct NotifyError {
    kind: ErrorKind,
    message: String,
}

impl NotifyError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

/// Failure of the record store itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or the operation failed in the driver.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be decoded into a capsule.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failure of an owner-facing capsule operation.
#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid recipient address `{address}`: {reason}")]
    InvalidRecipient { address: String, reason: String },

    /// Not found, or owned by somebody else (reported the same way).
    #[error("capsule not found: {0}")]
    NotFound(CapsuleId),

    #[error("capsule {0} was already delivered and can no longer be edited")]
    AlreadyDelivered(CapsuleId),

    #[error("capsule {0} is being delivered right now")]
    InFlight(CapsuleId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of one delivery cycle as a whole.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Another cycle of the same coordinator is still running.
    #[error("a delivery cycle is already running")]
    AlreadyRunning,

    #[error("delivery cycle aborted: {0}")]
    Store(#[from] StoreError),
}
