//! Claim - capsule 単位の時間制限付き予約
//!
//! claim は「この capsule は今このプロセスが送信中」という印です。
//! - 同時に有効な claim は 1 つだけ（store が原子的に保証）
//! - `expires_at` を過ぎた claim は失効扱い（クラッシュしても永久に取り残されない）
//! - commit / release は token が一致する claim holder だけが行える

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CapsuleId, ClaimToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub capsule_id: CapsuleId,
    pub token: ClaimToken,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(capsule_id: CapsuleId, token: ClaimToken, expires_at: DateTime<Utc>) -> Self {
        Self {
            capsule_id,
            token,
            expires_at,
        }
    }

    /// Claim proposal valid for `ttl` starting at `now`.
    pub fn lasting(capsule_id: CapsuleId, token: ClaimToken, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::new(capsule_id, token, now + ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
