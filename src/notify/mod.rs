//! Best-effort email summaries.
//!
//! The engine reports actions taken through the `NotificationSink` trait.
//! Delivery is fire-and-forget: a failed send is logged by the caller and
//! never aborts a run. When no SMTP section is configured the engine gets
//! a no-op sink.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::{AppConfig, EmailConfig};
use crate::types::InvestError;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Delivery channel for run summaries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), InvestError>;
}

/// Sink used when email is not configured. Logs and drops.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send(&self, subject: &str, _body: &str) -> Result<(), InvestError> {
        debug!(subject, "Email not configured — dropping notification");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SMTP sink
// ---------------------------------------------------------------------------

/// SMTP-backed sink. The password is resolved from the environment
/// variable named in the config, never stored in the config itself.
pub struct SmtpSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: EmailConfig,
}

impl std::fmt::Debug for SmtpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SmtpSink {
    pub fn new(config: EmailConfig) -> Result<Self, InvestError> {
        let password = AppConfig::resolve_env(&config.smtp_pass_env)
            .map_err(|e| InvestError::Config(e.to_string()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| InvestError::Config(format!("SMTP relay {}: {e}", config.smtp_host)))?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.smtp_user.clone(), password))
            .build();

        Ok(Self { transport, config })
    }

    fn subject_with_prefix(&self, subject: &str) -> String {
        match self.config.subject_prefix.as_deref() {
            Some(prefix) => format!("{prefix} {subject}"),
            None => subject.to_string(),
        }
    }

    fn mailbox(address: &str) -> Result<Mailbox, InvestError> {
        address
            .parse()
            .map_err(|e| InvestError::Config(format!("Bad mail address {address}: {e}")))
    }
}

#[async_trait]
impl NotificationSink for SmtpSink {
    async fn send(&self, subject: &str, body: &str) -> Result<(), InvestError> {
        let from = self
            .config
            .mail_from
            .as_deref()
            .unwrap_or(&self.config.smtp_user);

        let email = Message::builder()
            .from(Self::mailbox(from)?)
            .to(Self::mailbox(&self.config.mail_to)?)
            .subject(self.subject_with_prefix(subject))
            .body(body.to_string())
            .map_err(|e| InvestError::Notification(format!("Cannot build message: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| InvestError::Notification(format!("SMTP send failed: {e}")))?;

        info!(subject, "Summary mail sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
