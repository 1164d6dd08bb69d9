//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（SQLite, SMTP, 時計）へのインターフェースで、
//! 実装の詳細は `impls` に置きます。
//!
//! # 設計原則
//! - CapsuleStore が source of truth（正本）
//! - Notifier は送るだけ（リトライしない・store に触らない）
//! - Clock / IdGenerator は差し替え可能（テストで決定的にする）

pub mod capsule_store;
pub mod clock;
pub mod id_generator;
pub mod notifier;

pub use self::capsule_store::CapsuleStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::Notifier;
