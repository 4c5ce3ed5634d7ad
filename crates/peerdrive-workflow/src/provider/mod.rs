//! External capability traits
//!
//! The core stays agnostic to vendors: phone verification, document
//! verification and recipient lookup are narrow traits implemented by the
//! composition root (Twilio/Onfido/… adapters in production, logging stubs
//! in development).

mod effects;

pub use effects::ProviderEffects;

use async_trait::async_trait;
use uuid::Uuid;

use crate::notify::Recipient;
use crate::workflow::EffectError;

/// Failure of a provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Error message
    pub message: String,

    /// Whether retrying the call may succeed
    pub retryable: bool,
}

impl ProviderError {
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

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for EffectError {
    fn from(err: ProviderError) -> Self {
        Self {
            message: err.message,
            retryable: err.retryable,
        }
    }
}

/// Document-verification vendor
///
/// `submit` hands the subject's documents to the vendor and returns the
/// vendor's reference id. The asynchronous result arrives later as a
/// `signal_external` call redeeming the step's callback token.
#[async_trait]
pub trait ExternalVerifier: Send + Sync + 'static {
    async fn submit(
        &self,
        subject_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<String, ProviderError>;
}

/// Phone-verification vendor (vendor-managed codes)
///
/// Code checking happens in the API layer against the same vendor; the core
/// only triggers the send. Sending is safe to repeat.
#[async_trait]
pub trait PhoneVerifier: Send + Sync + 'static {
    async fn send_code(&self, phone: &str) -> Result<(), ProviderError>;
}

/// Narrow read interface onto the user/booking record store
#[async_trait]
pub trait RecipientDirectory: Send + Sync + 'static {
    async fn lookup(&self, subject_id: Uuid) -> Result<Recipient, ProviderError>;
}
