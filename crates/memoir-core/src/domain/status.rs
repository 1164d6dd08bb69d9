//! Capsule delivery status.

use serde::{Deserialize, Serialize};

/// Delivery status of a capsule.
///
/// State transitions:
/// - Pending -> Delivered (exactly once, by the delivery coordinator)
///
/// There is no way back: `Delivered` is terminal. The in-flight claim is not a
/// status of its own; it is a time-bounded marker carried next to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    /// Waiting for its delivery time (or for a retry after a failed send).
    Pending,

    /// Sent successfully. Terminal.
    Delivered,
}

impl CapsuleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CapsuleStatus::Delivered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CapsuleStatus::Pending => "pending",
            CapsuleStatus::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CapsuleStatus::Pending),
            "delivered" => Some(CapsuleStatus::Delivered),
            _ => None,
        }
    }
}

/// Record counts per delivery state, for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    /// Pending and not held by a live claim.
    pub pending: usize,
    /// Pending and held by a live claim (a send is in flight).
    pub claimed: usize,
    pub delivered: usize,
}

impl StoreCounts {
    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.delivered
    }
}
