//! Dry-run notifier: logs the message instead of sending it.

use async_trait::async_trait;

use crate::domain::{NotifyError, OutgoingEmail};
use crate::ports::Notifier;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body_len = email.body.len(),
            attachments = email.attachments.len(),
            "dry run: email not sent"
        );
        Ok(())
    }
}
