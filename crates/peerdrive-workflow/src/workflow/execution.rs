//! Workflow execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a step within a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Create a step id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution is in progress (possibly suspended waiting for a signal)
    Running,

    /// All steps completed
    Succeeded,

    /// A step reported failure (vendor rejection, explicit failure signal)
    Failed,

    /// A waiting step's deadline elapsed without a signal
    TimedOut,

    /// Cancelled by an operator or the subject
    Aborted,
}

impl ExecutionStatus {
    /// Terminal states are immutable; no operation may advance past them
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why an execution ended in a non-success terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Human-readable reason
    pub message: String,

    /// The step the execution was at when it failed
    pub step: Option<StepId>,
}

impl ExecutionFailure {
    /// Create a failure record
    pub fn new(message: impl Into<String>, step: Option<StepId>) -> Self {
        Self {
            message: message.into(),
            step,
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// One in-flight run of a workflow definition for one subject
///
/// The record is the only mutable shared state in the system. It is owned by
/// the engine and mutated exclusively through the store's optimistic version
/// check; suspension between steps is nothing more than this row sitting in
/// the store with `status == Running`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique execution id
    pub id: Uuid,

    /// The entity the workflow is about (a user or a booking)
    pub subject_id: Uuid,

    /// Name of the workflow definition in the registry
    pub definition: String,

    /// Current status
    pub status: ExecutionStatus,

    /// The step the execution is at; `None` once the definition is exhausted
    pub current_step: Option<StepId>,

    /// Steps completed so far, in registry order, append-only
    pub completed_steps: Vec<StepId>,

    /// True while the current step's entry effect has not yet succeeded
    ///
    /// Re-running a pending entry effect is the documented duplicate-effect
    /// window: entry effects must be idempotent.
    pub entry_pending: bool,

    /// Live callback token, present only while suspended on a callback step
    pub pending_token: Option<String>,

    /// Deadline for the current waiting step, if it carries a timeout
    pub step_deadline: Option<DateTime<Utc>>,

    /// Failure detail for `Failed` / `TimedOut` / `Aborted`
    pub failure: Option<ExecutionFailure>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Create a fresh execution positioned at the first step of a definition
    pub fn new(subject_id: Uuid, definition: impl Into<String>, first_step: StepId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            subject_id,
            definition: definition.into(),
            status: ExecutionStatus::Running,
            current_step: Some(first_step),
            completed_steps: vec![],
            entry_pending: true,
            pending_token: None,
            step_deadline: None,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the execution is suspended waiting for a token redemption
    pub fn awaiting_callback(&self) -> bool {
        self.status == ExecutionStatus::Running && self.pending_token.is_some()
    }

    /// Whether the current waiting step's deadline has elapsed
    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Running
            && self.step_deadline.map(|d| d <= now).unwrap_or(false)
    }
}
