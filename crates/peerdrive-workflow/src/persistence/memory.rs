//! In-memory store implementations
//!
//! Versioned-row arenas under `parking_lot` locks, with the same semantics
//! as the PostgreSQL implementations. Primarily for tests and for running
//! the worker without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{ExecutionStore, StoreError, TokenStore};
use crate::gateway::CallbackToken;
use crate::workflow::{ExecutionStatus, WorkflowExecution};

/// In-memory implementation of [`ExecutionStore`]
///
/// # Example
///
/// ```
/// use peerdrive_workflow::MemoryExecutionStore;
///
/// let store = MemoryExecutionStore::new();
/// ```
pub struct MemoryExecutionStore {
    rows: RwLock<HashMap<Uuid, (WorkflowExecution, u32)>>,
}

impl MemoryExecutionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored executions
    pub fn execution_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.rows.write().clear();
    }
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        rows.insert(execution.id, (execution.clone(), 1));
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<(WorkflowExecution, u32), StoreError> {
        let rows = self.rows.read();
        rows.get(&id)
            .map(|(execution, version)| (execution.clone(), *version))
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    async fn save(
        &self,
        execution: &WorkflowExecution,
        expected_version: u32,
    ) -> Result<u32, StoreError> {
        let mut rows = self.rows.write();
        let (stored, version) = rows
            .get_mut(&execution.id)
            .ok_or(StoreError::ExecutionNotFound(execution.id))?;

        if *version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: *version,
            });
        }

        *stored = execution.clone();
        *version += 1;
        Ok(*version)
    }

    async fn find_active(
        &self,
        subject_id: Uuid,
        definition: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let rows = self.rows.read();
        Ok(rows
            .values()
            .map(|(execution, _)| execution)
            .find(|e| {
                e.subject_id == subject_id
                    && e.definition == definition
                    && e.status == ExecutionStatus::Running
            })
            .cloned())
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = self.rows.read();
        let mut expired: Vec<&WorkflowExecution> = rows
            .values()
            .map(|(execution, _)| execution)
            .filter(|e| e.deadline_elapsed(now))
            .collect();

        expired.sort_by_key(|e| e.step_deadline);

        Ok(expired.into_iter().take(limit).map(|e| e.id).collect())
    }
}

/// In-memory implementation of [`TokenStore`]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, CallbackToken>>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (unredeemed) tokens
    pub fn live_count(&self) -> usize {
        self.tokens.read().values().filter(|t| !t.redeemed).count()
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, token: &CallbackToken) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write();
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<CallbackToken>, StoreError> {
        let tokens = self.tokens.read();
        Ok(tokens.get(token).cloned())
    }

    async fn mark_redeemed(&self, token: &str) -> Result<(), StoreError> {
        // Single write lock makes check-and-set atomic: one winner under
        // concurrent redemption.
        let mut tokens = self.tokens.write();
        let record = tokens.get_mut(token).ok_or(StoreError::TokenNotFound)?;

        if record.redeemed {
            return Err(StoreError::AlreadyRedeemed);
        }

        record.redeemed = true;
        Ok(())
    }

    async fn revoke_for_execution(&self, execution_id: Uuid) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write();
        for record in tokens.values_mut() {
            if record.execution_id == execution_id {
                record.redeemed = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepId;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(Uuid::now_v7(), "driver_onboarding", StepId::new("first"))
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = MemoryExecutionStore::new();
        let execution = execution();

        store.insert(&execution).await.unwrap();

        let (loaded, version) = store.load(execution.id).await.unwrap();
        assert_eq!(loaded, execution);
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = MemoryExecutionStore::new();
        let id = Uuid::now_v7();

        assert!(matches!(
            store.load(id).await,
            Err(StoreError::ExecutionNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_save_bumps_version() {
        let store = MemoryExecutionStore::new();
        let mut execution = execution();
        store.insert(&execution).await.unwrap();

        execution.completed_steps.push(StepId::new("first"));
        let version = store.save(&execution, 1).await.unwrap();
        assert_eq!(version, 2);

        let (loaded, version) = store.load(execution.id).await.unwrap();
        assert_eq!(loaded.completed_steps.len(), 1);
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_save_conflict() {
        let store = MemoryExecutionStore::new();
        let execution = execution();
        store.insert(&execution).await.unwrap();

        store.save(&execution, 1).await.unwrap();

        // Second writer still holds version 1
        let result = store.save(&execution, 1).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_find_active() {
        let store = MemoryExecutionStore::new();
        let mut execution = execution();
        store.insert(&execution).await.unwrap();

        let found = store
            .find_active(execution.subject_id, "driver_onboarding")
            .await
            .unwrap();
        assert_eq!(found.map(|e| e.id), Some(execution.id));

        // Terminal executions are not active
        execution.status = ExecutionStatus::Succeeded;
        store.save(&execution, 1).await.unwrap();

        let found = store
            .find_active(execution.subject_id, "driver_onboarding")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_expired_orders_oldest_first() {
        let store = MemoryExecutionStore::new();

        let mut early = execution();
        early.step_deadline = Some(Utc::now() - chrono::Duration::minutes(10));
        let mut late = execution();
        late.step_deadline = Some(Utc::now() - chrono::Duration::minutes(1));
        let mut pending = execution();
        pending.step_deadline = Some(Utc::now() + chrono::Duration::minutes(10));

        store.insert(&late).await.unwrap();
        store.insert(&early).await.unwrap();
        store.insert(&pending).await.unwrap();

        let expired = store.find_expired(Utc::now(), 10).await.unwrap();
        assert_eq!(expired, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn test_token_redeem_once() {
        let store = MemoryTokenStore::new();
        let token = CallbackToken {
            token: "t1".to_string(),
            execution_id: Uuid::now_v7(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            redeemed: false,
        };

        store.put(&token).await.unwrap();
        assert_eq!(store.live_count(), 1);

        store.mark_redeemed("t1").await.unwrap();
        assert!(matches!(
            store.mark_redeemed("t1").await,
            Err(StoreError::AlreadyRedeemed)
        ));
        assert_eq!(store.live_count(), 0);
    }

    #[tokio::test]
    async fn test_revoke_for_execution() {
        let store = MemoryTokenStore::new();
        let execution_id = Uuid::now_v7();
        let token = CallbackToken {
            token: "t1".to_string(),
            execution_id,
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            redeemed: false,
        };

        store.put(&token).await.unwrap();
        store.revoke_for_execution(execution_id).await.unwrap();

        assert!(matches!(
            store.mark_redeemed("t1").await,
            Err(StoreError::AlreadyRedeemed)
        ));
    }
}
