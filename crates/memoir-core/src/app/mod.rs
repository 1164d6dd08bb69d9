//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定からの構築とワイヤリング
//! - **CapsuleService**: owner から見た CRUD（API 層が呼ぶ）
//! - **DueSetScanner**: due な capsule の候補集合
//! - **DeliveryCoordinator**: 1 cycle 分の claim → send → commit
//! - **SchedulerLoop**: 一定間隔で cycle を起動
//! - **StatusSnapshot**: 運用者向けの件数

pub mod builder;
pub mod capsules;
pub mod coordinator;
pub mod scanner;
pub mod scheduler_loop;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::capsules::CapsuleService;
pub use self::coordinator::{DeliveryCoordinator, DeliverySettings};
pub use self::scanner::DueSetScanner;
pub use self::scheduler_loop::{SchedulerHandle, SchedulerLoop};
pub use self::status::StatusSnapshot;
