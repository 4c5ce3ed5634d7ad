//! Declarative workflow definitions
//!
//! A definition is an immutable, ordered table of step descriptors. All
//! behavior — what runs on entry, what a step waits for, how long it may
//! wait, what a timeout means — lives in this data. Adding a step to a
//! workflow is a data change only; nothing outside the table branches on
//! step identity.

pub mod catalog;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::{ExecutionStatus, InputKind, StepEffect, StepId};

/// What completes a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepGate {
    /// Completes inside the advance loop once its entry effect succeeds
    Automatic,

    /// Suspends until the subject submits through the API (no token)
    Submission,

    /// Suspends until an external actor redeems the callback token
    Callback,
}

/// One step in a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Step identifier, unique within the definition
    pub id: StepId,

    /// What completes this step
    pub gate: StepGate,

    /// Payload shape the completing submission/signal must carry
    pub input: InputKind,

    /// How long a waiting step may wait; `None` means unbounded
    /// (callback steps still get the engine's default token TTL)
    #[serde(with = "option_duration_millis")]
    pub timeout: Option<Duration>,

    /// Side effect run when the step is entered
    pub on_enter: Option<StepEffect>,

    /// Side effect run when the step times out (best-effort)
    pub on_timeout: Option<StepEffect>,

    /// Terminal status assigned on timeout
    pub timeout_status: ExecutionStatus,
}

impl StepDescriptor {
    /// Create a descriptor with no effects, no timeout, no payload
    pub fn new(id: impl Into<StepId>, gate: StepGate) -> Self {
        Self {
            id: id.into(),
            gate,
            input: InputKind::None,
            timeout: None,
            on_enter: None,
            on_timeout: None,
            timeout_status: ExecutionStatus::TimedOut,
        }
    }

    /// Declare the payload shape that completes this step
    pub fn with_input(mut self, input: InputKind) -> Self {
        self.input = input;
        self
    }

    /// Set the wait timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the entry effect
    pub fn with_on_enter(mut self, effect: StepEffect) -> Self {
        self.on_enter = Some(effect);
        self
    }

    /// Set the timeout effect
    pub fn with_on_timeout(mut self, effect: StepEffect) -> Self {
        self.on_timeout = Some(effect);
        self
    }

    /// Set the terminal status assigned on timeout (must be terminal)
    pub fn with_timeout_status(mut self, status: ExecutionStatus) -> Self {
        debug_assert!(status.is_terminal());
        self.timeout_status = status;
        self
    }

    /// Whether this step suspends on a callback token
    pub fn awaits_external(&self) -> bool {
        self.gate == StepGate::Callback
    }
}

/// A named, ordered sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<StepDescriptor>,

    /// Notification hook run best-effort when the execution reaches any
    /// non-success terminal state
    pub on_failure: Option<StepEffect>,
}

impl WorkflowDefinition {
    /// Create a definition from an ordered list of steps
    ///
    /// # Panics
    ///
    /// Panics if `steps` is empty or contains duplicate ids; definitions are
    /// built once at startup, so this is a configuration error.
    pub fn new(name: impl Into<String>, steps: Vec<StepDescriptor>) -> Self {
        assert!(!steps.is_empty(), "workflow definition must have steps");

        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            assert!(
                seen.insert(step.id.clone()),
                "duplicate step id: {}",
                step.id
            );
        }

        Self {
            name: name.into(),
            steps,
            on_failure: None,
        }
    }

    /// Set the failure notification hook
    pub fn with_on_failure(mut self, effect: StepEffect) -> Self {
        self.on_failure = Some(effect);
        self
    }

    /// The definition's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The first step
    pub fn first(&self) -> &StepDescriptor {
        &self.steps[0]
    }

    /// The step following `current`; `None` when the definition is complete
    pub fn next(&self, current: &StepId) -> Option<&StepDescriptor> {
        let pos = self.steps.iter().position(|s| &s.id == current)?;
        self.steps.get(pos + 1)
    }

    /// Look up a step by id
    pub fn step(&self, id: &StepId) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// All step ids in order
    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; kept for iterator-style symmetry
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Immutable registry of workflow definitions
///
/// Built once at startup by the composition root and shared read-only with
/// the engine.
pub struct DefinitionRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl DefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Add a definition
    pub fn register(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions
            .insert(definition.name().to_string(), definition);
        self
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    /// Check whether a definition is registered
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered definition names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(|s| s.as_str())
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_steps() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "test",
            vec![
                StepDescriptor::new("a", StepGate::Automatic),
                StepDescriptor::new("b", StepGate::Submission),
                StepDescriptor::new("c", StepGate::Callback),
            ],
        )
    }

    #[test]
    fn test_ordering() {
        let definition = three_steps();

        assert_eq!(definition.first().id, StepId::new("a"));
        assert_eq!(
            definition.next(&StepId::new("a")).map(|s| s.id.clone()),
            Some(StepId::new("b"))
        );
        assert_eq!(
            definition.next(&StepId::new("b")).map(|s| s.id.clone()),
            Some(StepId::new("c"))
        );
        assert!(definition.next(&StepId::new("c")).is_none());
    }

    #[test]
    fn test_next_unknown_step() {
        let definition = three_steps();
        assert!(definition.next(&StepId::new("zz")).is_none());
    }

    #[test]
    fn test_awaits_external() {
        let definition = three_steps();

        assert!(!definition.step(&StepId::new("a")).unwrap().awaits_external());
        assert!(!definition.step(&StepId::new("b")).unwrap().awaits_external());
        assert!(definition.step(&StepId::new("c")).unwrap().awaits_external());
    }

    #[test]
    #[should_panic(expected = "duplicate step id")]
    fn test_duplicate_step_rejected() {
        WorkflowDefinition::new(
            "bad",
            vec![
                StepDescriptor::new("a", StepGate::Automatic),
                StepDescriptor::new("a", StepGate::Automatic),
            ],
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = DefinitionRegistry::new().register(three_steps());

        assert!(registry.contains("test"));
        assert!(!registry.contains("unknown"));
        assert_eq!(registry.get("test").unwrap().len(), 3);
    }

    #[test]
    fn test_descriptor_serialization() {
        let step = StepDescriptor::new("kyc", StepGate::Callback)
            .with_input(InputKind::VerificationReport)
            .with_timeout(Duration::from_secs(3600));

        let json = serde_json::to_string(&step).unwrap();
        let parsed: StepDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(step, parsed);
    }
}
