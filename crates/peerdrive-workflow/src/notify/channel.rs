//! Notification channels and the dispatcher

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Push,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Where a notice can reach a subject
///
/// Each channel picks the address it needs; a missing address is a
/// non-retryable send failure on that channel, which is exactly what lets
/// the fallback channel take over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub subject_id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub device_token: Option<String>,
}

impl Recipient {
    /// Create a recipient with no addresses
    pub fn new(subject_id: Uuid) -> Self {
        Self {
            subject_id,
            email: None,
            phone: None,
            device_token: None,
        }
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the phone number
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set the push device token
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        self.device_token = Some(token.into());
        self
    }
}

/// A rendered notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Short subject line (used by email, ignored by SMS)
    pub subject: String,

    /// Body text
    pub body: String,

    /// Callback token the recipient's action should redeem, if any
    pub action_token: Option<String>,
}

impl Message {
    /// Create a message
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            action_token: None,
        }
    }

    /// Attach a callback token
    pub fn with_action_token(mut self, token: impl Into<String>) -> Self {
        self.action_token = Some(token.into());
        self
    }
}

/// Failure of a single send on a single channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
    /// Error message
    pub message: String,

    /// Whether retrying the same channel may succeed
    pub retryable: bool,
}

impl ChannelError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ChannelError {}

/// One notification transport implementation
///
/// Implementations are stateless per call and must bound their own network
/// timeouts; the delivery policy above them owns retries.
#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    /// The transport this channel implements
    fn kind(&self) -> ChannelKind;

    /// Send one message to one recipient
    async fn send(&self, recipient: &Recipient, message: &Message) -> Result<(), ChannelError>;
}

/// Routes a send to the registered channel implementation
///
/// The channel set is fixed at construction; providers are injected once at
/// process startup.
pub struct Dispatcher {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel implementation
    pub fn register(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Check whether a channel kind is registered
    pub fn supports(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    /// Send through one channel
    pub async fn dispatch(
        &self,
        kind: ChannelKind,
        recipient: &Recipient,
        message: &Message,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get(&kind)
            .ok_or_else(|| ChannelError::non_retryable(format!("no {kind} channel registered")))?;

        channel.send(recipient, message).await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OkChannel(ChannelKind);

    #[async_trait]
    impl NotificationChannel for OkChannel {
        fn kind(&self) -> ChannelKind {
            self.0
        }

        async fn send(&self, _: &Recipient, _: &Message) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_registered_channel() {
        let dispatcher = Dispatcher::new().register(Arc::new(OkChannel(ChannelKind::Email)));
        let recipient = Recipient::new(Uuid::now_v7()).with_email("owner@example.com");
        let message = Message::new("Booking request", "A renter requested your car.");

        assert!(dispatcher.supports(ChannelKind::Email));
        assert!(dispatcher
            .dispatch(ChannelKind::Email, &recipient, &message)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_unregistered_channel() {
        let dispatcher = Dispatcher::new();
        let recipient = Recipient::new(Uuid::now_v7());
        let message = Message::new("x", "y");

        let err = dispatcher
            .dispatch(ChannelKind::Push, &recipient, &message)
            .await
            .unwrap_err();

        assert!(!err.retryable);
        assert!(err.message.contains("push"));
    }

    #[test]
    fn test_recipient_builder() {
        let recipient = Recipient::new(Uuid::now_v7())
            .with_email("driver@example.com")
            .with_phone("+15550100");

        assert_eq!(recipient.email.as_deref(), Some("driver@example.com"));
        assert_eq!(recipient.phone.as_deref(), Some("+15550100"));
        assert!(recipient.device_token.is_none());
    }

    #[test]
    fn test_channel_kind_display() {
        assert_eq!(ChannelKind::Email.to_string(), "email");
        assert_eq!(ChannelKind::Sms.to_string(), "sms");
        assert_eq!(ChannelKind::Push.to_string(), "push");
    }
}
