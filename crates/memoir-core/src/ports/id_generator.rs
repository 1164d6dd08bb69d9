//! IdGenerator port - capsule ID と claim token の発行
//!
//! capsule の ID と claim token を生成します。
//! 複数プロセスが同じ store を共有しても衝突しないよう ULID を使います。

use crate::domain::ids::{CapsuleId, ClaimToken};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（coordinator が並行に claim token を発行する）
pub trait IdGenerator: Send + Sync {
    fn generate_capsule_id(&self) -> CapsuleId;

    fn generate_claim_token(&self) -> ClaimToken;
}

/// 注入された Clock の時刻を timestamp 部に使う ULID 生成器。
/// FixedClock を使うと timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_capsule_id(&self) -> CapsuleId {
        CapsuleId::from(self.next_ulid())
    }

    fn generate_claim_token(&self) -> ClaimToken {
        ClaimToken::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_capsule_id();
        let id2 = id_gen.generate_capsule_id();

        assert_ne!(id1, id2);
        assert_ne!(id_gen.generate_claim_token(), id_gen.generate_claim_token());
    }

    #[test]
    fn ulid_generator_with_fixed_clock_stamps_clock_time() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_capsule_id();
        let id2 = id_gen.generate_capsule_id();

        // ランダム部分があるので ID は異なるが、timestamp 部分は同じ
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
