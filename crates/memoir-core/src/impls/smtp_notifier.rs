//! SmtpNotifier - lettre による SMTP 送信
//!
//! - STARTTLS relay（既定）か、平文の接続（ローカル relay 向け）
//! - SMTP の 5xx 応答は Permanent、それ以外（接続失敗・4xx・TLS）は Transient に分類
//! - 添付の locator は本文末尾に一覧として追記する（ファイル自体はアップロードしない）

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{ConfigError, SmtpConfig};
use crate::domain::{NotifyError, OutgoingEmail};
use crate::ports::Notifier;

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build the transport. No connection is opened until the first send.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let address: Address = config
            .from
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("smtp.from: {e}")))?;
        let from = Mailbox::new(config.display_name.clone(), address);

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| ConfigError::Invalid(format!("smtp relay {}: {e}", config.host)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
        };
        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            starttls = config.starttls,
            "smtp notifier configured"
        );
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn render(&self, email: &OutgoingEmail) -> Result<Message, NotifyError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| NotifyError::permanent(format!("invalid recipient `{}`: {e}", email.to)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(render_body(email))
            .map_err(|e| NotifyError::permanent(format!("build message: {e}")))
    }
}

fn render_body(email: &OutgoingEmail) -> String {
    if email.attachments.is_empty() {
        return email.body.clone();
    }
    let mut body = email.body.trim_end().to_string();
    body.push_str("\n\nAttachments:\n");
    for locator in &email.attachments {
        body.push_str("- ");
        body.push_str(locator);
        body.push('\n');
    }
    body
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let message = self.render(email)?;
        match self.transport.send(message).await {
            Ok(response) => {
                tracing::debug!(to = %email.to, code = %response.code(), "smtp accepted message");
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(NotifyError::permanent(format!("smtp: {e}"))),
            Err(e) => Err(NotifyError::transient(format!("smtp: {e}"))),
        }
    }
}
