//! Store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::gateway::CallbackToken;
use crate::workflow::WorkflowExecution;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Token not found
    #[error("token not found")]
    TokenNotFound,

    /// Concurrency conflict (optimistic version check failed)
    #[error("concurrency conflict: expected version {expected}, got {actual}")]
    Conflict { expected: u32, actual: u32 },

    /// Token was already redeemed or revoked
    #[error("token already redeemed")]
    AlreadyRedeemed,

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Store for workflow execution records
///
/// Execution rows carry a version; `save` succeeds only when the caller's
/// version matches the stored one, which serializes all mutations on a
/// single execution. Operations on different executions are independent.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    /// Insert a new execution at version 1
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), StoreError>;

    /// Load an execution together with its current version
    async fn load(&self, id: Uuid) -> Result<(WorkflowExecution, u32), StoreError>;

    /// Save an execution, expecting the stored version to still be
    /// `expected_version`; returns the new version
    async fn save(
        &self,
        execution: &WorkflowExecution,
        expected_version: u32,
    ) -> Result<u32, StoreError>;

    /// Find the running execution for a subject under a definition, if any
    async fn find_active(
        &self,
        subject_id: Uuid,
        definition: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Running executions whose step deadline elapsed, oldest first
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError>;
}

/// Store for callback tokens
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Persist a freshly issued token
    async fn put(&self, token: &CallbackToken) -> Result<(), StoreError>;

    /// Look up a token by its wire form
    async fn get(&self, token: &str) -> Result<Option<CallbackToken>, StoreError>;

    /// Mark a token redeemed
    ///
    /// Must be atomic: under concurrent redemption exactly one caller gets
    /// `Ok`, every other observes `AlreadyRedeemed`.
    async fn mark_redeemed(&self, token: &str) -> Result<(), StoreError>;

    /// Permanently invalidate any live token owned by an execution
    async fn revoke_for_execution(&self, execution_id: Uuid) -> Result<(), StoreError>;
}
