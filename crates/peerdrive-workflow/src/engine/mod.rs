//! Workflow execution engine

mod executor;
mod sweeper;

pub use executor::{EngineConfig, EngineError, WorkflowEngine};
pub use sweeper::{ExpirySweeper, SweeperConfig};
