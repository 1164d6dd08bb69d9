//! Status - 運用者向けのスナップショット

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{StoreCounts, StoreError};
use crate::ports::{CapsuleStore, Clock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub at: DateTime<Utc>,
    pub counts: StoreCounts,
    /// Pending capsules whose target time has passed (claimable right now).
    pub due_now: usize,
}

impl StatusSnapshot {
    pub async fn collect(store: &dyn CapsuleStore, clock: &dyn Clock) -> Result<Self, StoreError> {
        let at = clock.now();
        let counts = store.counts(at).await?;
        let due_now = store.find_due(at).await?.len();
        Ok(Self {
            at,
            counts,
            due_now,
        })
    }
}
