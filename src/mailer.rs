//! Mail transport — SMTP via lettre behind an injectable trait.
//!
//! The pipeline only knows `send -> ok|fail`; a single request is atomic
//! from its perspective (no partial success per recipient).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::message::{MessageType, ResolvedMessage};

/// Opaque mail transport seam.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver a resolved message. Call/fail; no per-recipient outcome.
    async fn send(&self, message: &ResolvedMessage) -> Result<(), MailError>;
}

/// SMTP transport using lettre.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build the lettre message for a resolved email.
    fn build_message(config: &SmtpConfig, mail: &ResolvedMessage) -> Result<Message, MailError> {
        let from = config
            .from_address
            .parse()
            .map_err(|_| MailError::InvalidAddress(config.from_address.clone()))?;

        let mut builder = Message::builder().from(from).subject(&mail.subject);
        for recipient in &mail.recipients {
            let mailbox = recipient
                .parse()
                .map_err(|_| MailError::InvalidAddress(recipient.clone()))?;
            builder = builder.to(mailbox);
        }

        let content_type = match mail.message_type {
            MessageType::Plain => ContentType::TEXT_PLAIN,
            MessageType::Html => ContentType::TEXT_HTML,
        };

        builder
            .header(content_type)
            .body(mail.rendered_body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }

    /// Connect and send, blocking. Run inside `spawn_blocking`.
    fn send_blocking(config: &SmtpConfig, message: &Message) -> Result<(), MailError> {
        let mut builder = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::Smtp(format!("relay setup: {e}")))?
            .port(config.port)
            .timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        let transport = builder.build();
        transport
            .send(message)
            .map_err(|e| MailError::Smtp(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &ResolvedMessage) -> Result<(), MailError> {
        let message = Self::build_message(&self.config, mail)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &message))
            .await
            .map_err(|e| MailError::Smtp(format!("send task panicked: {e}")))??;

        info!(
            recipients = mail.recipients.len(),
            subject = %mail.subject,
            "Email sent"
        );
        Ok(())
    }
}
