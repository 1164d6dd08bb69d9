//! DueSetScanner - その時点で配送すべき capsule の候補集合
//!
//! scan の結果は「候補」に過ぎません。実際に送ってよいかは claim の成否で決まります。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{CapsuleId, StoreError};
use crate::ports::CapsuleStore;

pub struct DueSetScanner {
    store: Arc<dyn CapsuleStore>,
}

impl DueSetScanner {
    pub fn new(store: Arc<dyn CapsuleStore>) -> Self {
        Self { store }
    }

    /// Ids of pending capsules whose target time is `<= now`, without duplicates.
    /// Order is unspecified.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<CapsuleId>, StoreError> {
        let due = self.store.find_due(now).await?;
        let mut seen = HashSet::with_capacity(due.len());
        Ok(due
            .into_iter()
            // store 実装によらず、未来の capsule は候補にしない
            .filter(|capsule| capsule.is_due(now))
            .map(|capsule| capsule.id)
            .filter(|id| seen.insert(*id))
            .collect())
    }
}
