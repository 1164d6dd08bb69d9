//! Domain model (capsule record, claim, status, ids, outcomes, errors).
//!
//! ports / impls / app のどれにも依存しない純粋なモデル層です。
//! 状態遷移のルール（claim の排他・配送済みの単調性・編集可否）はすべて
//! `Capsule` のメソッドに集約し、各 store 実装はそれを呼ぶだけにします。

pub mod capsule;
pub mod claim;
pub mod email;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod status;

pub use capsule::{validate_recipient, Capsule, CapsulePatch, EditOutcome, NewCapsule};
pub use claim::Claim;
pub use email::OutgoingEmail;
pub use errors::{CapsuleError, CycleError, ErrorKind, NotifyError, StoreError};
pub use ids::{CapsuleId, ClaimToken, OwnerId, ParseIdError};
pub use outcome::{CycleReport, DeliveryOutcome};
pub use status::{CapsuleStatus, StoreCounts};
