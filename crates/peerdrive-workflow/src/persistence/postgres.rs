//! PostgreSQL store implementations
//!
//! Production persistence:
//! - Optimistic concurrency via a per-row version column
//! - Exactly-once token redemption via a conditional UPDATE
//! - Deadline scans for the expiry sweeper

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{ExecutionStore, StoreError, TokenStore};
use crate::gateway::CallbackToken;
use crate::workflow::{ExecutionStatus, StepId, WorkflowExecution};

/// PostgreSQL implementation of [`ExecutionStore`]
///
/// # Example
///
/// ```ignore
/// use peerdrive_workflow::PostgresExecutionStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/peerdrive").await?;
/// let store = PostgresExecutionStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    /// Create a store over a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn insert(&self, execution: &WorkflowExecution) -> Result<(), StoreError> {
        let completed_steps = serde_json::to_value(&execution.completed_steps)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let failure = execution
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, subject_id, definition, status, current_step, completed_steps,
                 entry_pending, pending_token, step_deadline, failure, version,
                 created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11, $12, $13)
            "#,
        )
        .bind(execution.id)
        .bind(execution.subject_id)
        .bind(&execution.definition)
        .bind(execution.status.to_string())
        .bind(execution.current_step.as_ref().map(|s| s.as_str().to_string()))
        .bind(&completed_steps)
        .bind(execution.entry_pending)
        .bind(&execution.pending_token)
        .bind(execution.step_deadline)
        .bind(&failure)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!("inserted execution");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, id: Uuid) -> Result<(WorkflowExecution, u32), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, definition, status, current_step, completed_steps,
                   entry_pending, pending_token, step_deadline, failure, version,
                   created_at, updated_at, completed_at
            FROM workflow_executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load execution: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::ExecutionNotFound(id))?;

        let version: i32 = row.get("version");
        Ok((row_to_execution(&row)?, version as u32))
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn save(
        &self,
        execution: &WorkflowExecution,
        expected_version: u32,
    ) -> Result<u32, StoreError> {
        let completed_steps = serde_json::to_value(&execution.completed_steps)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let failure = execution
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $3,
                current_step = $4,
                completed_steps = $5,
                entry_pending = $6,
                pending_token = $7,
                step_deadline = $8,
                failure = $9,
                updated_at = $10,
                completed_at = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(execution.id)
        .bind(expected_version as i32)
        .bind(execution.status.to_string())
        .bind(execution.current_step.as_ref().map(|s| s.as_str().to_string()))
        .bind(&completed_steps)
        .bind(execution.entry_pending)
        .bind(&execution.pending_token)
        .bind(execution.step_deadline)
        .bind(&failure)
        .bind(execution.updated_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            // Either the row is gone or another writer got there first;
            // re-read to tell the two apart.
            let row = sqlx::query(
                r#"
                SELECT version FROM workflow_executions WHERE id = $1
                "#,
            )
            .bind(execution.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::ExecutionNotFound(execution.id))?;

            let actual: i32 = row.get("version");
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: actual as u32,
            });
        }

        debug!(version = expected_version + 1, "saved execution");
        Ok(expected_version + 1)
    }

    #[instrument(skip(self))]
    async fn find_active(
        &self,
        subject_id: Uuid,
        definition: &str,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, definition, status, current_step, completed_steps,
                   entry_pending, pending_token, step_deadline, failure, version,
                   created_at, updated_at, completed_at
            FROM workflow_executions
            WHERE subject_id = $1 AND definition = $2 AND status = 'running'
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .bind(definition)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find active execution: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.map(|r| row_to_execution(&r)).transpose()
    }

    #[instrument(skip(self))]
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM workflow_executions
            WHERE status = 'running'
              AND step_deadline IS NOT NULL
              AND step_deadline <= $1
            ORDER BY step_deadline
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to scan for expired executions: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

/// PostgreSQL implementation of [`TokenStore`]
#[derive(Clone)]
pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    /// Create a store over a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    #[instrument(skip(self, token), fields(execution_id = %token.execution_id))]
    async fn put(&self, token: &CallbackToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO callback_tokens (token, execution_id, issued_at, expires_at, redeemed)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token)
        .bind(token.execution_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.redeemed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store token: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn get(&self, token: &str) -> Result<Option<CallbackToken>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT token, execution_id, issued_at, expires_at, redeemed
            FROM callback_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load token: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(row.map(|r| CallbackToken {
            token: r.get("token"),
            execution_id: r.get("execution_id"),
            issued_at: r.get("issued_at"),
            expires_at: r.get("expires_at"),
            redeemed: r.get("redeemed"),
        }))
    }

    #[instrument(skip(self, token))]
    async fn mark_redeemed(&self, token: &str) -> Result<(), StoreError> {
        // Conditional UPDATE is the linearization point: one row transitions
        // false → true exactly once.
        let result = sqlx::query(
            r#"
            UPDATE callback_tokens
            SET redeemed = TRUE
            WHERE token = $1 AND NOT redeemed
            "#,
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to redeem token: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query(
                r#"
                SELECT 1 AS present FROM callback_tokens WHERE token = $1
                "#,
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            return Err(if exists.is_some() {
                StoreError::AlreadyRedeemed
            } else {
                StoreError::TokenNotFound
            });
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke_for_execution(&self, execution_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE callback_tokens
            SET redeemed = TRUE
            WHERE execution_id = $1 AND NOT redeemed
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to revoke tokens: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }
}

/// Map a row from `workflow_executions` onto the record type
fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<WorkflowExecution, StoreError> {
    let status: String = row.get("status");
    let completed_steps: serde_json::Value = row.get("completed_steps");
    let failure: Option<serde_json::Value> = row.get("failure");
    let current_step: Option<String> = row.get("current_step");

    Ok(WorkflowExecution {
        id: row.get("id"),
        subject_id: row.get("subject_id"),
        definition: row.get("definition"),
        status: parse_execution_status(&status)?,
        current_step: current_step.map(StepId::new),
        completed_steps: serde_json::from_value(completed_steps)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        entry_pending: row.get("entry_pending"),
        pending_token: row.get("pending_token"),
        step_deadline: row.get("step_deadline"),
        failure: failure
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn parse_execution_status(s: &str) -> Result<ExecutionStatus, StoreError> {
    match s {
        "running" => Ok(ExecutionStatus::Running),
        "succeeded" => Ok(ExecutionStatus::Succeeded),
        "failed" => Ok(ExecutionStatus::Failed),
        "timed_out" => Ok(ExecutionStatus::TimedOut),
        "aborted" => Ok(ExecutionStatus::Aborted),
        other => Err(StoreError::Serialization(format!(
            "unknown execution status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execution_status() {
        assert!(matches!(
            parse_execution_status("running"),
            Ok(ExecutionStatus::Running)
        ));
        assert!(matches!(
            parse_execution_status("timed_out"),
            Ok(ExecutionStatus::TimedOut)
        ));
        assert!(parse_execution_status("bogus").is_err());
    }

    #[test]
    fn test_status_roundtrips_through_display() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::TimedOut,
            ExecutionStatus::Aborted,
        ] {
            assert_eq!(parse_execution_status(&status.to_string()).unwrap(), status);
        }
    }
}
