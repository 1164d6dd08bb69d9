//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryCapsuleStore**: 単一プロセス用の store（テスト・dry run）
//! - **SqliteCapsuleStore**: 永続化用の store（複数プロセスで共有可）
//! - **SmtpNotifier**: lettre による SMTP 送信
//! - **LogNotifier**: 送らずにログだけ出す（dry run）
//! - **RecordingNotifier**: 送信を記録し、失敗・遅延を再現する（テスト用）

pub mod inmem_store;
pub mod log_notifier;
pub mod recording_notifier;
pub mod smtp_notifier;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryCapsuleStore;
pub use self::log_notifier::LogNotifier;
pub use self::recording_notifier::RecordingNotifier;
pub use self::smtp_notifier::SmtpNotifier;
pub use self::sqlite_store::SqliteCapsuleStore;
