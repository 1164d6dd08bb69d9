//! Capsule record: content + delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::Claim;
use super::email::OutgoingEmail;
use super::errors::CapsuleError;
use super::ids::{CapsuleId, ClaimToken, OwnerId};
use super::status::CapsuleStatus;

/// A scheduled message and everything needed to deliver it exactly once.
///
/// Design:
/// - The store holds the only authoritative copy; everybody else works on clones.
/// - All state transitions happen through the methods below, so the in-memory
///   and SQLite stores share the same rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub id: CapsuleId,
    pub owner_id: OwnerId,

    /// Short label shown to the owner.
    pub title: String,
    pub recipient: String,
    pub subject: String,
    pub message: String,

    /// Opaque storage locators, in the order the owner attached them.
    #[serde(default)]
    pub media: Vec<String>,

    pub deliver_at: DateTime<Utc>,
    pub status: CapsuleStatus,

    /// In-flight marker. Only meaningful while `status` is `Pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,

    /// Number of send attempts started (one per successful claim).
    pub attempts: u32,

    /// Reason of the last failed send attempt.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Capsule {
    pub fn new(id: CapsuleId, owner_id: OwnerId, draft: NewCapsule, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            title: draft.title.trim().to_string(),
            recipient: draft.recipient.trim().to_string(),
            subject: draft.subject,
            message: draft.message,
            media: draft.media,
            deliver_at: draft.deliver_at,
            status: CapsuleStatus::Pending,
            claim: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    /// Target time has passed and the capsule is still pending.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CapsuleStatus::Pending && self.deliver_at <= now
    }

    pub fn has_live_claim(&self, now: DateTime<Utc>) -> bool {
        self.claim.is_some_and(|claim| !claim.is_expired(now))
    }

    /// Due and not held by anybody (an expired claim does not hold).
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_due(now) && !self.has_live_claim(now)
    }

    /// Take `claim` if the capsule is claimable. Counts as the start of an attempt.
    pub fn try_claim(&mut self, claim: &Claim, now: DateTime<Utc>) -> bool {
        if claim.capsule_id != self.id || !self.is_claimable(now) {
            return false;
        }
        self.claim = Some(*claim);
        self.attempts += 1;
        self.updated_at = now;
        true
    }

    /// Flip to `Delivered` unless a different claimant holds the record.
    ///
    /// A claim that lapsed without being taken over still commits: the send
    /// already happened and refusing would only cause a duplicate later.
    pub fn commit_delivery(&mut self, token: ClaimToken, now: DateTime<Utc>) -> bool {
        if self.status != CapsuleStatus::Pending {
            return false;
        }
        if self.claim.is_some_and(|held| held.token != token) {
            return false;
        }
        self.status = CapsuleStatus::Delivered;
        self.claim = None;
        self.last_error = None;
        self.delivered_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Drop the claim held under `token`, recording why the attempt failed.
    pub fn release_claim(&mut self, token: ClaimToken, now: DateTime<Utc>, reason: Option<&str>) -> bool {
        if !self.claim.is_some_and(|held| held.token == token) {
            return false;
        }
        self.claim = None;
        if let Some(reason) = reason {
            self.last_error = Some(reason.to_string());
        }
        self.updated_at = now;
        true
    }

    /// Clear a claim whose deadline passed. Returns true if one was cleared.
    pub fn reap_claim(&mut self, now: DateTime<Utc>) -> bool {
        if self.claim.is_some_and(|held| held.is_expired(now)) {
            self.claim = None;
            return true;
        }
        false
    }

    /// Apply an owner edit, enforcing the edit rules.
    pub fn apply_edit(&mut self, patch: &CapsulePatch, now: DateTime<Utc>) -> EditOutcome {
        if self.status.is_terminal() {
            return EditOutcome::AlreadyDelivered;
        }
        if self.has_live_claim(now) {
            return EditOutcome::InFlight;
        }
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(recipient) = &patch.recipient {
            self.recipient = recipient.trim().to_string();
        }
        if let Some(subject) = &patch.subject {
            self.subject = subject.clone();
        }
        if let Some(message) = &patch.message {
            self.message = message.clone();
        }
        if let Some(media) = &patch.media {
            self.media = media.clone();
        }
        if let Some(deliver_at) = patch.deliver_at {
            self.deliver_at = deliver_at;
        }
        self.updated_at = now;
        EditOutcome::Updated(self.clone())
    }

    pub fn to_outgoing(&self) -> OutgoingEmail {
        OutgoingEmail::new(&self.recipient, &self.subject, &self.message)
            .with_attachments(self.media.clone())
    }
}

/// Validated owner submission for a new capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCapsule {
    pub title: String,
    pub recipient: String,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub deliver_at: DateTime<Utc>,
}

impl NewCapsule {
    pub fn validate(&self) -> Result<(), CapsuleError> {
        require("title", &self.title)?;
        require("subject", &self.subject)?;
        require("message", &self.message)?;
        require("recipient", &self.recipient)?;
        validate_recipient(&self.recipient)
    }
}

/// Partial edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapsulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<DateTime<Utc>>,
}

impl CapsulePatch {
    pub fn is_empty(&self) -> bool {
        self == &CapsulePatch::default()
    }

    pub fn validate(&self) -> Result<(), CapsuleError> {
        if let Some(title) = &self.title {
            require("title", title)?;
        }
        if let Some(subject) = &self.subject {
            require("subject", subject)?;
        }
        if let Some(message) = &self.message {
            require("message", message)?;
        }
        if let Some(recipient) = &self.recipient {
            require("recipient", recipient)?;
            validate_recipient(recipient)?;
        }
        Ok(())
    }
}

/// Result of an edit attempt, decided atomically by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Updated(Capsule),
    NotFound,
    AlreadyDelivered,
    InFlight,
}

/// Recipient must parse as a single RFC 5322 address.
pub fn validate_recipient(address: &str) -> Result<(), CapsuleError> {
    address
        .trim()
        .parse::<lettre::Address>()
        .map(|_| ())
        .map_err(|e| CapsuleError::InvalidRecipient {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn require(field: &'static str, value: &str) -> Result<(), CapsuleError> {
    if value.trim().is_empty() {
        return Err(CapsuleError::MissingField(field));
    }
    Ok(())
}
