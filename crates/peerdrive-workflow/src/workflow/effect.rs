//! Step side effects
//!
//! Effects are data: step descriptors name *what* should happen on entry or
//! timeout, and an [`EffectRunner`] decides *how*. This keeps the registry
//! fully declarative and the engine free of per-step branching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{StepInput, WorkflowExecution};
use crate::gateway::CallbackToken;
use crate::notify::ChannelKind;

/// Templates for subject-facing notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Ask the owner to accept or decline a booking request
    OwnerDecisionRequested,

    /// Tell the renter the owner accepted
    BookingConfirmed,

    /// Tell the renter the request expired without a decision
    BookingRequestExpired,

    /// Tell the driver their account is active
    KycApproved,

    /// Tell the driver verification was rejected
    KycRejected,

    /// Tell the driver their verification window lapsed
    KycWindowLapsed,
}

/// A side effect named by a step descriptor
///
/// Serialized alongside the definition so registries can be inspected and
/// logged; interpreted only by the configured [`EffectRunner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum StepEffect {
    /// Send a phone verification code to the subject
    SendVerificationCode,

    /// Submit the subject's documents to the verification vendor
    StartDocumentCheck,

    /// Deliver a notice through a primary channel with optional fallback
    Notify {
        notice: NoticeKind,
        primary: ChannelKind,
        fallback: Option<ChannelKind>,
    },
}

/// Failure of a step side effect
///
/// Retryable effect failures leave the execution at its current step; the
/// caller re-drives it with `advance_synchronous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectError {
    /// Error message
    pub message: String,

    /// Whether re-running the effect may succeed
    pub retryable: bool,
}

impl EffectError {
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

impl std::fmt::Display for EffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EffectError {}

impl From<anyhow::Error> for EffectError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Interprets step effects against the provider set
///
/// # Idempotency
///
/// The engine runs an effect at most once per step on the success path, but a
/// crash or failure between the effect and the persisted transition means the
/// effect can run again on retry. Implementations must therefore be
/// externally safe to repeat (re-sending a verification code, re-submitting
/// the same documents to the vendor).
#[async_trait]
pub trait EffectRunner: Send + Sync + 'static {
    /// Run one effect for one execution
    ///
    /// `input` is the validated payload that completed the previous step (or
    /// `StepInput::None` at the head of the definition). `callback` is the
    /// live token when the effect belongs to a callback step, so
    /// notifications can embed it for the external actor to redeem.
    async fn run(
        &self,
        effect: &StepEffect,
        execution: &WorkflowExecution,
        input: &StepInput,
        callback: Option<&CallbackToken>,
    ) -> Result<(), EffectError>;
}
