//! CapsuleService - owner から見た capsule の CRUD
//!
//! API 層（HTTP など）はこの service だけを呼びます。
//! - 他人の capsule は「存在しない」と区別がつかないように扱う
//! - 配送済み・配送中の capsule は編集できない（削除はいつでも可）
//! - 作成時の確認メールは best-effort（失敗しても作成は成功）

use std::sync::Arc;

use crate::domain::{
    Capsule, CapsuleError, CapsuleId, CapsulePatch, EditOutcome, NewCapsule, OutgoingEmail,
    OwnerId,
};
use crate::ports::{CapsuleStore, Clock, IdGenerator, Notifier};

pub struct CapsuleService {
    store: Arc<dyn CapsuleStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    /// Set when creation should send a confirmation notice.
    confirmations: Option<Arc<dyn Notifier>>,
}

impl CapsuleService {
    pub fn new(store: Arc<dyn CapsuleStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            clock,
            ids,
            confirmations: None,
        }
    }

    pub fn with_confirmations(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.confirmations = Some(notifier);
        self
    }

    pub async fn create(&self, owner: OwnerId, draft: NewCapsule) -> Result<Capsule, CapsuleError> {
        draft.validate()?;
        let capsule = Capsule::new(self.ids.generate_capsule_id(), owner, draft, self.clock.now());
        self.store.insert(capsule.clone()).await?;
        tracing::info!(
            capsule_id = %capsule.id,
            owner_id = %owner,
            deliver_at = %capsule.deliver_at,
            "capsule scheduled"
        );

        if let Some(notifier) = &self.confirmations {
            let notice = confirmation_notice(&capsule);
            if let Err(e) = notifier.send(&notice).await {
                tracing::warn!(capsule_id = %capsule.id, error = %e, "confirmation notice not sent");
            }
        }
        Ok(capsule)
    }

    /// Newest first.
    pub async fn list(&self, owner: OwnerId) -> Result<Vec<Capsule>, CapsuleError> {
        Ok(self.store.list_owned(owner).await?)
    }

    pub async fn get(&self, owner: OwnerId, id: CapsuleId) -> Result<Capsule, CapsuleError> {
        self.store
            .get_owned(owner, id)
            .await?
            .ok_or(CapsuleError::NotFound(id))
    }

    pub async fn update(
        &self,
        owner: OwnerId,
        id: CapsuleId,
        patch: CapsulePatch,
    ) -> Result<Capsule, CapsuleError> {
        patch.validate()?;
        if patch.is_empty() {
            return self.get(owner, id).await;
        }
        match self
            .store
            .update_owned(owner, id, &patch, self.clock.now())
            .await?
        {
            EditOutcome::Updated(capsule) => {
                tracing::info!(capsule_id = %id, owner_id = %owner, "capsule updated");
                Ok(capsule)
            }
            EditOutcome::NotFound => Err(CapsuleError::NotFound(id)),
            EditOutcome::AlreadyDelivered => Err(CapsuleError::AlreadyDelivered(id)),
            EditOutcome::InFlight => Err(CapsuleError::InFlight(id)),
        }
    }

    /// Allowed in any status. A capsule deleted while its email is being sent
    /// may still reach the recipient.
    pub async fn delete(&self, owner: OwnerId, id: CapsuleId) -> Result<(), CapsuleError> {
        if !self.store.delete_owned(owner, id).await? {
            return Err(CapsuleError::NotFound(id));
        }
        tracing::info!(capsule_id = %id, owner_id = %owner, "capsule deleted");
        Ok(())
    }
}

/// The notice names the capsule and its date but never reveals the message.
fn confirmation_notice(capsule: &Capsule) -> OutgoingEmail {
    OutgoingEmail::new(
        &capsule.recipient,
        format!("Time capsule \"{}\" scheduled", capsule.title),
        format!(
            "Hello,\n\nA time capsule titled \"{}\" has been scheduled for you.\n\
             It will be delivered on {}.\n",
            capsule.title,
            capsule.deliver_at.format("%Y-%m-%d %H:%M UTC"),
        ),
    )
}
