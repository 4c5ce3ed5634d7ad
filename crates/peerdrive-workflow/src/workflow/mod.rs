//! Core data model: execution records, step payloads, side effects

mod effect;
mod execution;
mod input;

pub use effect::{EffectError, EffectRunner, NoticeKind, StepEffect};
pub use execution::{ExecutionFailure, ExecutionStatus, StepId, WorkflowExecution};
pub use input::{InputKind, SignalOutcome, StepInput};
