//! Notification publisher
//!
//! Fire-and-forget from the core's perspective: the circulation state change
//! is the source of truth, the notice is best-effort. Failures are logged and
//! never roll anything back.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use serde_json::Value;
use std::str::FromStr;

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

/// Circulation events a reader can be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A hold was queued for the reader.
    ReservationQueued,
    /// A held copy is waiting for pickup; payload carries the deadline.
    ReservationReady,
}

impl EventKind {
    pub fn subject(&self) -> &'static str {
        match self {
            EventKind::ReservationQueued => "Your reservation has been queued",
            EventKind::ReservationReady => "Your reserved book is ready for pickup",
        }
    }
}

/// Payload contract: callers put the reader's address under `"email"`
/// (null when the account has none stored) alongside the event data, so a
/// transport that needs a recipient can find one without its own lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i32, event: EventKind, payload: Value) -> AppResult<()>;
}

/// Recipient address from the notification payload.
fn recipient(payload: &Value) -> AppResult<String> {
    payload
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Internal("notification payload missing recipient address".into()))
}

/// Publish a notice, swallowing and logging any failure.
pub async fn dispatch_best_effort(
    notifier: &dyn Notifier,
    user_id: i32,
    event: EventKind,
    payload: Value,
) {
    if let Err(e) = notifier.notify(user_id, event, payload).await {
        tracing::error!(user_id, ?event, error = %e, "failed to dispatch notification");
    }
}

/// SMTP notifier. With `email.enabled = false` it only logs, which is the
/// default for development setups without a relay.
#[derive(Clone)]
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_body(event: EventKind, payload: &Value) -> String {
        match event {
            EventKind::ReservationQueued => format!(
                "Your reservation is queued. You will be notified when a copy is held for you.\n\n{}",
                payload
            ),
            EventKind::ReservationReady => format!(
                "A copy is being held for you. Please collect it before the pickup window closes.\n\n{}",
                payload
            ),
        }
    }

    fn send_email(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Biblion");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        let mailer_builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer_builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        mailer_builder
            .build()
            .send(&email)
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, user_id: i32, event: EventKind, payload: Value) -> AppResult<()> {
        if !self.config.enabled {
            tracing::info!(user_id, ?event, %payload, "notification (email disabled)");
            return Ok(());
        }

        let to = recipient(&payload)?;
        let body = Self::build_body(event, &payload);
        self.send_email(&to, event.subject(), &body)
    }
}

/// Notifier that drops everything; used by one-shot console runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, user_id: i32, event: EventKind, payload: Value) -> AppResult<()> {
        tracing::debug!(user_id, ?event, %payload, "notification dropped (null notifier)");
        Ok(())
    }
}
