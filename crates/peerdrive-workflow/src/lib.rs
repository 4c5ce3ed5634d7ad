//! # Onboarding & Booking Workflow Core
//!
//! The durable orchestration engine for the Peerdrive marketplace. It drives a
//! subject (a driver signing up, a booking awaiting the owner's decision)
//! through a declared sequence of steps that may each take arbitrary
//! wall-clock time, suspending on nothing more than persisted state.
//!
//! ## Features
//!
//! - **Declarative step registries**: each workflow is an ordered table of
//!   step descriptors; adding a step is a data change only
//! - **Suspend/resume on callback tokens**: externally-awaited steps issue a
//!   single-use, unguessable token; redeeming it resumes exactly one
//!   execution exactly once
//! - **Optimistic concurrency**: execution records are versioned rows; all
//!   mutations on one execution are serialized, different executions are
//!   fully independent
//! - **Notification fallback**: delivery through a primary channel with
//!   bounded exponential-backoff retries, then a single fallback attempt
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (advance loop, signal handling, lazy expiry transitions)   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                      │                      │
//!          ▼                      ▼                      ▼
//! ┌────────────────┐  ┌────────────────────┐  ┌──────────────────┐
//! │ ExecutionStore │  │  CallbackGateway    │  │   EffectRunner   │
//! │ (versioned     │  │  (TokenStore,       │  │  (verifier,      │
//! │  rows)         │  │   exactly-once)     │  │   notifications) │
//! └────────────────┘  └────────────────────┘  └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use peerdrive_workflow::prelude::*;
//!
//! let engine = WorkflowEngine::new(
//!     MemoryExecutionStore::new(),
//!     MemoryTokenStore::new(),
//!     catalog::standard_registry(),
//!     effects,
//! );
//!
//! let execution = engine
//!     .start(catalog::DRIVER_ONBOARDING, driver_id, StepInput::None)
//!     .await?;
//!
//! // ... later, the verification vendor redeems the callback token:
//! engine
//!     .signal_external(&token, SignalOutcome::Success, report)
//!     .await?;
//! ```

pub mod definition;
pub mod engine;
pub mod gateway;
pub mod notify;
pub mod persistence;
pub mod provider;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::definition::{
        catalog, DefinitionRegistry, StepDescriptor, StepGate, WorkflowDefinition,
    };
    pub use crate::engine::{EngineConfig, EngineError, ExpirySweeper, SweeperConfig, WorkflowEngine};
    pub use crate::gateway::{CallbackGateway, CallbackToken, GatewayError};
    pub use crate::notify::{
        ChannelError, ChannelKind, DeliveryPolicy, DeliveryReport, DeliveryRequest, DeliveryStatus,
        Dispatcher, FallbackDelivery, Message, NotificationAttempt, NotificationChannel, Recipient,
    };
    pub use crate::persistence::{
        ExecutionStore, MemoryExecutionStore, MemoryTokenStore, PostgresExecutionStore,
        PostgresTokenStore, StoreError, TokenStore,
    };
    pub use crate::provider::{
        ExternalVerifier, PhoneVerifier, ProviderEffects, ProviderError, RecipientDirectory,
    };
    pub use crate::workflow::{
        EffectError, EffectRunner, ExecutionFailure, ExecutionStatus, InputKind, SignalOutcome,
        StepEffect, StepId, StepInput, WorkflowExecution,
    };
}

// Re-export key types at crate root
pub use definition::{DefinitionRegistry, StepDescriptor, StepGate, WorkflowDefinition};
pub use engine::{EngineConfig, EngineError, ExpirySweeper, SweeperConfig, WorkflowEngine};
pub use gateway::{CallbackGateway, CallbackToken, GatewayError};
pub use notify::{
    ChannelKind, DeliveryPolicy, DeliveryReport, DeliveryRequest, DeliveryStatus, Dispatcher,
    FallbackDelivery, Message, NotificationChannel, Recipient,
};
pub use persistence::{
    ExecutionStore, MemoryExecutionStore, MemoryTokenStore, StoreError, TokenStore,
};
pub use workflow::{
    EffectRunner, ExecutionStatus, SignalOutcome, StepEffect, StepId, StepInput, WorkflowExecution,
};
