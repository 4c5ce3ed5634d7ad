//! Background expiry sweep
//!
//! The lazy checks on `status`/`signal_external` catch expired executions
//! that someone still looks at; the sweeper catches the ones nobody does,
//! so timeout notifications go out even for abandoned flows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::executor::{EngineError, WorkflowEngine};
use crate::persistence::{ExecutionStore, TokenStore};

/// Sweep configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SweeperConfig {
    /// Time between sweeps
    pub interval: Duration,

    /// Maximum executions expired per sweep
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

impl SweeperConfig {
    /// Create a sweeper configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-sweep batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Periodically transitions deadline-elapsed executions to their timeout
/// status
pub struct ExpirySweeper<E: ExecutionStore, T: TokenStore> {
    engine: Arc<WorkflowEngine<E, T>>,
    config: SweeperConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl<E: ExecutionStore, T: TokenStore> ExpirySweeper<E, T> {
    /// Create a sweeper
    pub fn new(
        engine: Arc<WorkflowEngine<E, T>>,
        config: SweeperConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            config,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self) {
        info!(interval_ms = self.config.interval.as_millis(), "expiry sweeper started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(expired) => debug!(expired, "sweep expired executions"),
                Err(e) => warn!(error = %e, "sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.shutdown_rx.changed() => {
                    break;
                }
            }
        }

        info!("expiry sweeper stopped");
    }

    /// Run a single sweep, returning how many executions were expired
    pub async fn sweep_once(&self) -> Result<usize, EngineError> {
        let ids = self
            .engine
            .store()
            .find_expired(Utc::now(), self.config.batch_size)
            .await?;

        let mut expired = 0;
        for id in ids {
            match self.engine.expire(id).await {
                Ok(_) => expired += 1,
                // A concurrent signal or cancel won the row; nothing to do
                Err(EngineError::Conflict { .. }) => {
                    debug!(execution_id = %id, "lost expiry race, skipping")
                }
                Err(e) => warn!(execution_id = %id, error = %e, "failed to expire execution"),
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionRegistry, StepDescriptor, StepGate, WorkflowDefinition};
    use crate::gateway::CallbackToken;
    use crate::persistence::{MemoryExecutionStore, MemoryTokenStore};
    use crate::workflow::{
        EffectError, EffectRunner, ExecutionStatus, InputKind, StepEffect, StepInput,
        WorkflowExecution,
    };
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NoEffects;

    #[async_trait]
    impl EffectRunner for NoEffects {
        async fn run(
            &self,
            _: &StepEffect,
            _: &WorkflowExecution,
            _: &StepInput,
            _: Option<&CallbackToken>,
        ) -> Result<(), EffectError> {
            Ok(())
        }
    }

    fn engine_with_instant_timeout() -> Arc<WorkflowEngine<MemoryExecutionStore, MemoryTokenStore>>
    {
        let definition = WorkflowDefinition::new(
            "waiting",
            vec![StepDescriptor::new("decision", StepGate::Callback)
                .with_input(InputKind::Decision)
                .with_timeout(Duration::ZERO)],
        );

        Arc::new(WorkflowEngine::new(
            Arc::new(MemoryExecutionStore::new()),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(DefinitionRegistry::new().register(definition)),
            Arc::new(NoEffects),
        ))
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_executions() {
        let engine = engine_with_instant_timeout();
        let execution = engine
            .start("waiting", Uuid::now_v7(), StepInput::None)
            .await
            .unwrap();

        let (_tx, rx) = watch::channel(false);
        let sweeper = ExpirySweeper::new(
            engine.clone(),
            SweeperConfig::new().with_interval(Duration::from_millis(10)),
            rx,
        );

        let expired = sweeper.sweep_once().await.unwrap();
        assert_eq!(expired, 1);

        let snapshot = engine.status(execution.id).await.unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::TimedOut);

        // Idempotent: a second sweep finds nothing
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let engine = engine_with_instant_timeout();
        let (tx, rx) = watch::channel(false);
        let sweeper = ExpirySweeper::new(
            engine,
            SweeperConfig::new().with_interval(Duration::from_secs(3600)),
            rx,
        );

        let handle = tokio::spawn(sweeper.run());
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
    }

    #[test]
    fn test_config_builder() {
        let config = SweeperConfig::new()
            .with_interval(Duration::from_secs(5))
            .with_batch_size(0);

        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 1);
    }
}
