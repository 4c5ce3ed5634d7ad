//! The workflow execution engine
//!
//! Drives executions through their definition's step table:
//! - `start` creates an execution and advances it as far as it can go
//! - `advance_synchronous` completes submission steps and retries failed
//!   entry effects
//! - `signal_external` resumes a suspended execution from a token redemption
//! - `status` / `cancel` / `expire` round out the lifecycle
//!
//! Suspension holds no thread, socket or lock: it is only the persisted
//! record sitting in the store. All mutations on one execution are
//! serialized by the store's optimistic version check; a lost race surfaces
//! as [`EngineError::Conflict`] and is never retried by the engine itself.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::definition::{DefinitionRegistry, StepDescriptor, StepGate, WorkflowDefinition};
use crate::gateway::{CallbackGateway, CallbackToken, GatewayError};
use crate::persistence::{ExecutionStore, StoreError, TokenStore};
use crate::workflow::{
    EffectError, EffectRunner, ExecutionFailure, ExecutionStatus, InputKind, SignalOutcome,
    StepEffect, StepId, StepInput, WorkflowExecution,
};

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Token lifetime for callback steps that declare no timeout
    pub default_token_ttl: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_token_ttl: std::time::Duration::from_secs(72 * 3600),
        }
    }
}

impl EngineConfig {
    /// Set the default token lifetime
    pub fn with_default_token_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.default_token_ttl = ttl;
        self
    }
}

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Definition name not present in the registry
    #[error("unknown workflow definition: {0}")]
    UnknownDefinition(String),

    /// An active execution already exists for this subject and definition
    #[error("active {definition} execution already exists for subject {subject_id}")]
    DuplicateExecution { subject_id: Uuid, definition: String },

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Operation requires a running execution
    #[error("execution {execution_id} is not running (status: {status})")]
    NotRunning {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    /// Unknown token, or a token that no longer belongs to its execution
    #[error("invalid callback token")]
    InvalidToken,

    /// Token was already redeemed (or revoked)
    #[error("callback token already redeemed")]
    AlreadyRedeemed,

    /// Token expired before redemption
    #[error("callback token expired")]
    Expired,

    /// The current step only completes through its callback token
    #[error("step {step} awaits an external callback")]
    CallbackPending { step: StepId },

    /// Submitted payload does not match the step's declared shape
    #[error("step {step} expects {expected} payload, got {got}")]
    UnexpectedInput {
        step: StepId,
        expected: InputKind,
        got: InputKind,
    },

    /// The step's entry effect failed; the execution stays at the step
    #[error("entry effect failed at step {step}: {source}")]
    Effect { step: StepId, source: EffectError },

    /// Optimistic version check failed; re-read and retry if appropriate
    #[error("concurrency conflict: expected version {expected}, got {actual}")]
    Conflict { expected: u32, actual: u32 },

    /// Execution references a step its definition does not declare
    #[error("definition {definition} has no step {step}")]
    UnknownStep { definition: String, step: StepId },

    /// Store error
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, actual } => Self::Conflict { expected, actual },
            StoreError::ExecutionNotFound(id) => Self::ExecutionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidToken => Self::InvalidToken,
            GatewayError::AlreadyRedeemed => Self::AlreadyRedeemed,
            GatewayError::Expired { .. } => Self::Expired,
            GatewayError::Store(e) => e.into(),
        }
    }
}

/// Workflow execution engine
///
/// # Example
///
/// ```ignore
/// use peerdrive_workflow::prelude::*;
///
/// let engine = WorkflowEngine::new(executions, tokens, registry, effects);
///
/// let execution = engine
///     .start(catalog::DRIVER_ONBOARDING, driver_id, StepInput::None)
///     .await?;
/// ```
pub struct WorkflowEngine<E: ExecutionStore, T: TokenStore> {
    executions: Arc<E>,
    gateway: CallbackGateway<T>,
    registry: Arc<DefinitionRegistry>,
    effects: Arc<dyn EffectRunner>,
    config: EngineConfig,
}

impl<E: ExecutionStore, T: TokenStore> WorkflowEngine<E, T> {
    /// Create an engine with default configuration
    pub fn new(
        executions: Arc<E>,
        tokens: Arc<T>,
        registry: Arc<DefinitionRegistry>,
        effects: Arc<dyn EffectRunner>,
    ) -> Self {
        Self::with_config(executions, tokens, registry, effects, EngineConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(
        executions: Arc<E>,
        tokens: Arc<T>,
        registry: Arc<DefinitionRegistry>,
        effects: Arc<dyn EffectRunner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executions,
            gateway: CallbackGateway::new(tokens),
            registry,
            effects,
            config,
        }
    }

    /// Get a reference to the execution store
    pub fn store(&self) -> &Arc<E> {
        &self.executions
    }

    /// Start an execution
    ///
    /// Creates the record at the definition's first step and advances
    /// through automatic steps until the definition ends or a waiting step
    /// is reached; a callback step gets its token issued before suspending.
    #[instrument(skip(self, input), fields(definition = definition_name))]
    pub async fn start(
        &self,
        definition_name: &str,
        subject_id: Uuid,
        input: StepInput,
    ) -> Result<WorkflowExecution, EngineError> {
        let definition = self
            .registry
            .get(definition_name)
            .ok_or_else(|| EngineError::UnknownDefinition(definition_name.to_string()))?;

        if self
            .executions
            .find_active(subject_id, definition_name)
            .await?
            .is_some()
        {
            return Err(EngineError::DuplicateExecution {
                subject_id,
                definition: definition_name.to_string(),
            });
        }

        let mut execution =
            WorkflowExecution::new(subject_id, definition_name, definition.first().id.clone());
        self.executions.insert(&execution).await?;
        let mut version = 1;

        info!(execution_id = %execution.id, %subject_id, "started execution");

        self.run_from_entry(&mut execution, &mut version, definition, input)
            .await?;

        Ok(execution)
    }

    /// Complete the current submission step (or retry a failed entry effect)
    ///
    /// Used for steps with no external dependency: the subject's own API
    /// submission drives them. If the current step's entry effect is still
    /// pending (a prior provider failure), this re-runs it instead.
    #[instrument(skip(self, input))]
    pub async fn advance_synchronous(
        &self,
        execution_id: Uuid,
        input: StepInput,
    ) -> Result<WorkflowExecution, EngineError> {
        let (mut execution, mut version) = self.executions.load(execution_id).await?;
        self.ensure_running(&execution)?;

        if execution.deadline_elapsed(Utc::now()) {
            let expired = self.expire(execution_id).await?;
            return Err(EngineError::NotRunning {
                execution_id,
                status: expired.status,
            });
        }

        let definition = self.definition_of(&execution)?;
        let step = self.current_step(&execution, definition)?.clone();

        if execution.entry_pending {
            // Retry path: re-drive the pending entry effect, then advance as
            // far as the gates allow.
            self.run_from_entry(&mut execution, &mut version, definition, input)
                .await?;
            return Ok(execution);
        }

        if step.gate == StepGate::Callback {
            return Err(EngineError::CallbackPending { step: step.id });
        }

        self.check_input(&step, &input)?;
        self.complete_and_advance(&mut execution, &mut version, definition, input)
            .await?;

        Ok(execution)
    }

    /// Resume a suspended execution from a callback token
    ///
    /// Redemption is exactly-once: under concurrent attempts one caller wins
    /// and the rest observe `InvalidToken`/`AlreadyRedeemed`. On
    /// `SignalOutcome::Failure` the execution fails immediately regardless
    /// of remaining steps.
    #[instrument(skip(self, token, payload))]
    pub async fn signal_external(
        &self,
        token: &str,
        outcome: SignalOutcome,
        payload: StepInput,
    ) -> Result<WorkflowExecution, EngineError> {
        // Validate everything about the attempt before spending the token's
        // single use; a malformed payload must not burn it.
        let record = match self.gateway.peek(token).await {
            Ok(record) => record,
            Err(GatewayError::Expired { execution_id, .. }) => {
                let _ = self.expire(execution_id).await;
                return Err(EngineError::Expired);
            }
            Err(e) => return Err(e.into()),
        };

        let (mut execution, mut version) = self.executions.load(record.execution_id).await?;
        self.ensure_running(&execution)?;

        if execution.pending_token.as_deref() != Some(token) {
            // A token that outlived its suspension (the execution has since
            // been re-suspended on a fresh one).
            return Err(EngineError::InvalidToken);
        }

        let definition = self.definition_of(&execution)?;
        let step = self.current_step(&execution, definition)?.clone();

        if outcome == SignalOutcome::Success {
            self.check_input(&step, &payload)?;
        }

        // Linearization point: exactly one concurrent signal gets past here.
        self.gateway.redeem(token).await?;

        match outcome {
            SignalOutcome::Failure => {
                info!(execution_id = %execution.id, step = %step.id, "external signal reported failure");
                self.finish(
                    &mut execution,
                    &mut version,
                    ExecutionStatus::Failed,
                    ExecutionFailure::new(
                        format!("step {} reported failure", step.id),
                        Some(step.id.clone()),
                    ),
                )
                .await?;
                self.run_failure_hook(definition, &execution).await;
            }
            SignalOutcome::Success => {
                execution.pending_token = None;
                self.complete_and_advance(&mut execution, &mut version, definition, payload)
                    .await?;
            }
        }

        Ok(execution)
    }

    /// Read-only snapshot of an execution
    ///
    /// Performs the lazy expiry check: a suspended execution whose deadline
    /// has passed transitions to its timeout status before being returned.
    pub async fn status(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let (execution, _) = self.executions.load(execution_id).await?;

        if execution.deadline_elapsed(Utc::now()) {
            return self.expire(execution_id).await;
        }

        Ok(execution)
    }

    /// Abort an execution
    ///
    /// Effective immediately for future redemptions and advances; already
    /// applied entry effects are not undone.
    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, execution_id: Uuid, reason: &str) -> Result<(), EngineError> {
        let (mut execution, mut version) = self.executions.load(execution_id).await?;
        self.ensure_running(&execution)?;

        let step = execution.current_step.clone();
        self.finish(
            &mut execution,
            &mut version,
            ExecutionStatus::Aborted,
            ExecutionFailure::new(reason, step),
        )
        .await?;

        // Any live token is now permanently invalid; redemption attempts in
        // the revocation gap still fail on the status check above.
        self.gateway.revoke(execution_id).await?;

        let definition = self.definition_of(&execution)?;
        self.run_failure_hook(definition, &execution).await;

        info!(%execution_id, %reason, "execution aborted");
        Ok(())
    }

    /// Apply the timeout transition to an execution whose deadline elapsed
    ///
    /// Idempotent: terminal and not-actually-expired executions are returned
    /// unchanged, so the sweeper and the lazy checks can race freely.
    #[instrument(skip(self))]
    pub async fn expire(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let (mut execution, mut version) = self.executions.load(execution_id).await?;

        if execution.status.is_terminal() || !execution.deadline_elapsed(Utc::now()) {
            return Ok(execution);
        }

        let definition = self.definition_of(&execution)?;
        let step = self.current_step(&execution, definition)?.clone();

        let status = if step.timeout_status.is_terminal() {
            step.timeout_status
        } else {
            ExecutionStatus::TimedOut
        };

        self.finish(
            &mut execution,
            &mut version,
            status,
            ExecutionFailure::new(
                format!("step {} timed out", step.id),
                Some(step.id.clone()),
            ),
        )
        .await?;
        self.gateway.revoke(execution_id).await?;

        warn!(%execution_id, step = %step.id, %status, "execution timed out");

        // Timeout notification, then the definition-level failure hook if
        // the step declares nothing of its own.
        if let Some(effect) = &step.on_timeout {
            self.run_effect_best_effort(effect, &execution).await;
        } else {
            self.run_failure_hook(definition, &execution).await;
        }

        Ok(execution)
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    /// Complete the current step, then keep advancing
    async fn complete_and_advance(
        &self,
        execution: &mut WorkflowExecution,
        version: &mut u32,
        definition: &WorkflowDefinition,
        input: StepInput,
    ) -> Result<(), EngineError> {
        self.complete_current(execution, definition);
        *version = self.executions.save(execution, *version).await?;

        if execution.status == ExecutionStatus::Running {
            self.run_from_entry(execution, version, definition, input)
                .await?;
        }

        Ok(())
    }

    /// Drive the execution from a step whose entry effect is still pending
    ///
    /// Automatic steps complete inside the loop; submission and callback
    /// steps persist their suspension and return. Each step transition is
    /// persisted before this method reports success, so the only
    /// duplicate-effect window is a crash (or failure) between an effect and
    /// its save.
    async fn run_from_entry(
        &self,
        execution: &mut WorkflowExecution,
        version: &mut u32,
        definition: &WorkflowDefinition,
        input: StepInput,
    ) -> Result<(), EngineError> {
        while execution.status == ExecutionStatus::Running && execution.entry_pending {
            let step = self.current_step(execution, definition)?.clone();

            match step.gate {
                StepGate::Callback => {
                    let ttl = step.timeout.unwrap_or(self.config.default_token_ttl);
                    let token = self.gateway.issue(execution.id, ttl).await?;

                    self.run_entry_effect(&step, execution, &input, Some(&token))
                        .await?;

                    execution.entry_pending = false;
                    execution.pending_token = Some(token.token.clone());
                    execution.step_deadline = Some(token.expires_at);
                    execution.updated_at = Utc::now();
                    *version = self.executions.save(execution, *version).await?;

                    debug!(execution_id = %execution.id, step = %step.id, "suspended on callback token");
                    return Ok(());
                }

                StepGate::Submission => {
                    self.run_entry_effect(&step, execution, &input, None).await?;

                    execution.entry_pending = false;
                    execution.pending_token = None;
                    execution.step_deadline = step
                        .timeout
                        .and_then(|t| chrono::Duration::from_std(t).ok())
                        .map(|t| Utc::now() + t);
                    execution.updated_at = Utc::now();
                    *version = self.executions.save(execution, *version).await?;

                    debug!(execution_id = %execution.id, step = %step.id, "suspended awaiting submission");
                    return Ok(());
                }

                StepGate::Automatic => {
                    self.run_entry_effect(&step, execution, &input, None).await?;

                    // Completion and the next step's entry share one save.
                    self.complete_current(execution, definition);
                    *version = self.executions.save(execution, *version).await?;

                    debug!(execution_id = %execution.id, step = %step.id, "automatic step completed");
                }
            }
        }

        if execution.status == ExecutionStatus::Succeeded {
            info!(execution_id = %execution.id, "execution succeeded");
        }

        Ok(())
    }

    /// Append the current step to the completed sequence and move on
    fn complete_current(&self, execution: &mut WorkflowExecution, definition: &WorkflowDefinition) {
        let Some(current) = execution.current_step.take() else {
            return;
        };

        execution.completed_steps.push(current.clone());
        execution.pending_token = None;
        execution.step_deadline = None;
        execution.updated_at = Utc::now();

        match definition.next(&current) {
            Some(next) => {
                execution.current_step = Some(next.id.clone());
                execution.entry_pending = true;
            }
            None => {
                execution.status = ExecutionStatus::Succeeded;
                execution.entry_pending = false;
                execution.completed_at = Some(Utc::now());
            }
        }
    }

    /// Run a step's entry effect, if declared
    async fn run_entry_effect(
        &self,
        step: &StepDescriptor,
        execution: &WorkflowExecution,
        input: &StepInput,
        callback: Option<&CallbackToken>,
    ) -> Result<(), EngineError> {
        let Some(effect) = &step.on_enter else {
            return Ok(());
        };

        self.effects
            .run(effect, execution, input, callback)
            .await
            .map_err(|source| {
                warn!(execution_id = %execution.id, step = %step.id, error = %source, "entry effect failed");
                EngineError::Effect {
                    step: step.id.clone(),
                    source,
                }
            })
    }

    /// Persist a terminal transition
    async fn finish(
        &self,
        execution: &mut WorkflowExecution,
        version: &mut u32,
        status: ExecutionStatus,
        failure: ExecutionFailure,
    ) -> Result<(), EngineError> {
        execution.status = status;
        execution.failure = Some(failure);
        execution.pending_token = None;
        execution.step_deadline = None;
        execution.entry_pending = false;
        execution.updated_at = Utc::now();
        execution.completed_at = Some(Utc::now());

        *version = self.executions.save(execution, *version).await?;
        Ok(())
    }

    /// Run the definition's failure hook, absorbing any error
    async fn run_failure_hook(&self, definition: &WorkflowDefinition, execution: &WorkflowExecution) {
        if let Some(effect) = &definition.on_failure {
            self.run_effect_best_effort(effect, execution).await;
        }
    }

    async fn run_effect_best_effort(&self, effect: &StepEffect, execution: &WorkflowExecution) {
        if let Err(e) = self
            .effects
            .run(effect, execution, &StepInput::None, None)
            .await
        {
            warn!(execution_id = %execution.id, error = %e, "failure-path effect did not complete");
        }
    }

    fn ensure_running(&self, execution: &WorkflowExecution) -> Result<(), EngineError> {
        if execution.status.is_terminal() {
            return Err(EngineError::NotRunning {
                execution_id: execution.id,
                status: execution.status,
            });
        }
        Ok(())
    }

    fn definition_of(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<&WorkflowDefinition, EngineError> {
        self.registry
            .get(&execution.definition)
            .ok_or_else(|| EngineError::UnknownDefinition(execution.definition.clone()))
    }

    fn current_step<'d>(
        &self,
        execution: &WorkflowExecution,
        definition: &'d WorkflowDefinition,
    ) -> Result<&'d StepDescriptor, EngineError> {
        let step_id = execution.current_step.as_ref().ok_or_else(|| {
            EngineError::UnknownStep {
                definition: execution.definition.clone(),
                step: StepId::new("<none>"),
            }
        })?;

        definition
            .step(step_id)
            .ok_or_else(|| EngineError::UnknownStep {
                definition: execution.definition.clone(),
                step: step_id.clone(),
            })
    }

    fn check_input(&self, step: &StepDescriptor, input: &StepInput) -> Result<(), EngineError> {
        if input.kind() != step.input {
            return Err(EngineError::UnexpectedInput {
                step: step.id.clone(),
                expected: step.input,
                got: input.kind(),
            });
        }
        Ok(())
    }
}
