//! Outcome model: what happened to each candidate of a delivery cycle.
//!
//! This module does not assume a particular store or transport. It only
//! defines the shape of results the coordinator reports and logs.

use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;
use super::ids::CapsuleId;

/// Result of processing one due candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    /// Sent and committed as delivered.
    Delivered,

    /// Send failed (or timed out); claim released for the next cycle.
    TransientFailure,

    /// Send failed with a permanent classification; claim released, retried next cycle.
    PermanentFailure,

    /// Someone else holds the record, or it stopped being due. Not an error.
    ClaimLost,

    /// Record deleted between scan and delivery. Not an error.
    Vanished,

    /// Not attempted because the cycle was aborted by a store failure.
    Aborted,
}

impl DeliveryOutcome {
    pub fn from_failure(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Transient => DeliveryOutcome::TransientFailure,
            ErrorKind::Permanent => DeliveryOutcome::PermanentFailure,
        }
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Number of due candidates found by the scan.
    pub scanned: usize,
    /// Expired claims returned to pending before the scan.
    pub reaped: usize,
    pub delivered: usize,
    pub transient_failures: usize,
    pub permanent_failures: usize,
    pub claim_lost: usize,
    pub vanished: usize,
    pub aborted: usize,

    /// Capsules that were delivered during this cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivered_ids: Vec<CapsuleId>,
}

impl CycleReport {
    pub fn record(&mut self, id: CapsuleId, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => {
                self.delivered += 1;
                self.delivered_ids.push(id);
            }
            DeliveryOutcome::TransientFailure => self.transient_failures += 1,
            DeliveryOutcome::PermanentFailure => self.permanent_failures += 1,
            DeliveryOutcome::ClaimLost => self.claim_lost += 1,
            DeliveryOutcome::Vanished => self.vanished += 1,
            DeliveryOutcome::Aborted => self.aborted += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.transient_failures + self.permanent_failures
    }

    /// Nothing was due and nothing was reaped.
    pub fn is_idle(&self) -> bool {
        self.scanned == 0 && self.reaped == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tallies_by_outcome() {
        let mut report = CycleReport {
            scanned: 4,
            ..CycleReport::default()
        };
        let delivered = CapsuleId::generate();

        report.record(delivered, DeliveryOutcome::Delivered);
        report.record(CapsuleId::generate(), DeliveryOutcome::from_failure(ErrorKind::Transient));
        report.record(CapsuleId::generate(), DeliveryOutcome::from_failure(ErrorKind::Permanent));
        report.record(CapsuleId::generate(), DeliveryOutcome::Vanished);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.delivered_ids, vec![delivered]);
        assert_eq!(report.failures(), 2);
        assert_eq!(report.vanished, 1);
        assert!(!report.is_idle());
    }

    #[test]
    fn outcome_serializes_screaming_snake() {
        let json = serde_json::to_string(&DeliveryOutcome::ClaimLost).unwrap();
        assert_eq!(json, "\"CLAIM_LOST\"");
    }
}
