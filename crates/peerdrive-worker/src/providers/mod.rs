//! Provider adapters
//!
//! Development adapters log; the webhook channel forwards sends to an
//! external gateway. Production vendor adapters (Twilio, Onfido, APNs)
//! implement the same traits and slot in here without touching the core.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use peerdrive_workflow::notify::{
    ChannelError, ChannelKind, Message, NotificationChannel, Recipient,
};
use peerdrive_workflow::provider::{
    ExternalVerifier, PhoneVerifier, ProviderError, RecipientDirectory,
};

/// Channel that logs instead of sending (development mode)
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, recipient: &Recipient, message: &Message) -> Result<(), ChannelError> {
        info!(
            channel = %self.kind,
            subject_id = %recipient.subject_id,
            subject = %message.subject,
            "notification (log mode)"
        );
        Ok(())
    }
}

/// Channel that POSTs each send to a configured gateway URL
pub struct WebhookChannel {
    kind: ChannelKind,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(kind: ChannelKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, recipient: &Recipient, message: &Message) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&json!({
                "channel": self.kind.to_string(),
                "recipient": recipient,
                "subject": message.subject,
                "body": message.body,
                "action_token": message.action_token,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::retryable(format!("webhook request failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else if response.status().is_client_error() {
            Err(ChannelError::non_retryable(format!(
                "webhook rejected send: {}",
                response.status()
            )))
        } else {
            Err(ChannelError::retryable(format!(
                "webhook returned {}",
                response.status()
            )))
        }
    }
}

/// Phone verifier that logs the send (development mode)
pub struct LogPhoneVerifier;

#[async_trait]
impl PhoneVerifier for LogPhoneVerifier {
    async fn send_code(&self, phone: &str) -> Result<(), ProviderError> {
        info!(%phone, "verification code send (log mode)");
        Ok(())
    }
}

/// Document verifier that logs the submission (development mode)
pub struct LogVerifier;

#[async_trait]
impl ExternalVerifier for LogVerifier {
    async fn submit(
        &self,
        subject_id: Uuid,
        _payload: serde_json::Value,
    ) -> Result<String, ProviderError> {
        let reference_id = format!("chk_{subject_id}");
        info!(%subject_id, %reference_id, "document check submission (log mode)");
        Ok(reference_id)
    }
}

/// Directory serving a fixed recipient from the environment (development
/// mode; production wires the user store here)
pub struct EnvDirectory {
    email: Option<String>,
    phone: Option<String>,
}

impl EnvDirectory {
    pub fn from_env() -> Self {
        Self {
            email: std::env::var("DEV_RECIPIENT_EMAIL").ok(),
            phone: std::env::var("DEV_RECIPIENT_PHONE").ok(),
        }
    }
}

#[async_trait]
impl RecipientDirectory for EnvDirectory {
    async fn lookup(&self, subject_id: Uuid) -> Result<Recipient, ProviderError> {
        let mut recipient = Recipient::new(subject_id);
        if let Some(email) = &self.email {
            recipient = recipient.with_email(email.clone());
        }
        if let Some(phone) = &self.phone {
            recipient = recipient.with_phone(phone.clone());
        }
        Ok(recipient)
    }
}
