//! In-memory fakes for backend traits (testing only)
//!
//! Provides `MemoryBackend` and `MemoryParameterStore` that satisfy the
//! trait contracts without touching any real infrastructure.
//!
//! `MemoryBackend` behaves like a small Terraform: every input is echoed back
//! as an output of the same name (plus any scripted outputs), a component
//! deployed with `enabled = false` produces no outputs, and `plan` reports
//! changes when inputs differ from what was applied or when drift has been
//! injected out of band.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend_traits::*;
use crate::error::BackendError;

/// Backend operation kinds, used to script failures and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deploy,
    Destroy,
    Plan,
    Outputs,
}

/// One recorded call against a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub operation: Operation,
    pub component: ComponentRef,
}

#[derive(Debug, Clone)]
struct DeployedComponent {
    inputs: Inputs,
    outputs: OutputMap,
    drift: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    deployed: BTreeMap<ComponentRef, DeployedComponent>,
    /// component name → outputs merged over the echoed inputs
    scripted_outputs: HashMap<String, OutputMap>,
    /// (operation, component name) → diagnostics
    failures: HashMap<(Operation, String), String>,
    delays: HashMap<Operation, Duration>,
    calls: Vec<BackendCall>,
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// In-memory provisioning backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set_outputs`](Self::set_outputs).
    pub fn with_outputs(self, component: &str, outputs: OutputMap) -> Self {
        self.set_outputs(component, outputs);
        self
    }

    /// Outputs every deployment of `component` reports, in addition to its inputs.
    pub fn set_outputs(&self, component: &str, outputs: OutputMap) {
        let mut state = self.state.lock().unwrap();
        state
            .scripted_outputs
            .insert(component.to_string(), outputs);
    }

    /// Make `operation` fail for every stack of `component`.
    ///
    /// A failing deploy still leaves partial state behind, like a real
    /// provisioning engine that created some resources before erroring.
    pub fn fail_on(&self, operation: Operation, component: &str, diagnostics: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .insert((operation, component.to_string()), diagnostics.to_string());
    }

    /// Remove a failure scripted with [`fail_on`](Self::fail_on).
    pub fn clear_failure(&self, operation: Operation, component: &str) {
        let mut state = self.state.lock().unwrap();
        state.failures.remove(&(operation, component.to_string()));
    }

    /// Delay every call of `operation` (used to exercise timeouts).
    pub fn delay(&self, operation: Operation, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.delays.insert(operation, delay);
    }

    pub fn clear_delay(&self, operation: Operation) {
        let mut state = self.state.lock().unwrap();
        state.delays.remove(&operation);
    }

    /// Simulate an out-of-band modification of a deployed component.
    pub fn inject_drift(&self, component: &ComponentRef, description: &str) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        let deployed = state
            .deployed
            .get_mut(component)
            .ok_or_else(|| BackendError::ComponentNotFound(component.to_string()))?;
        deployed.drift = Some(description.to_string());
        Ok(())
    }

    /// Whether `component` currently has (possibly partial) state.
    pub fn is_deployed(&self, component: &ComponentRef) -> bool {
        let state = self.state.lock().unwrap();
        state.deployed.contains_key(component)
    }

    /// All components with live state.
    pub fn deployed(&self) -> Vec<ComponentRef> {
        let state = self.state.lock().unwrap();
        state.deployed.keys().cloned().collect()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        let state = self.state.lock().unwrap();
        state.calls.clone()
    }

    /// Components passed to `operation`, in call order.
    pub fn calls_for(&self, operation: Operation) -> Vec<ComponentRef> {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.component.clone())
            .collect()
    }

    /// Record the call and return the scripted delay and failure, if any.
    fn begin(
        &self,
        operation: Operation,
        component: &ComponentRef,
    ) -> (Option<Duration>, Option<String>) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall {
            operation,
            component: component.clone(),
        });
        let delay = state.delays.get(&operation).copied();
        let failure = state
            .failures
            .get(&(operation, component.component.clone()))
            .cloned();
        (delay, failure)
    }

    async fn enter(&self, operation: Operation, component: &ComponentRef) -> Option<String> {
        let (delay, failure) = self.begin(operation, component);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        failure
    }
}

fn is_disabled(inputs: &Inputs) -> bool {
    matches!(inputs.get("enabled"), Some(serde_json::Value::Bool(false)))
}

fn changed_keys(applied: &Inputs, requested: &Inputs) -> Vec<String> {
    let mut keys: Vec<String> = applied
        .keys()
        .chain(requested.keys())
        .filter(|k| applied.get(*k) != requested.get(*k))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

#[async_trait]
impl ProvisioningBackend for MemoryBackend {
    async fn deploy(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<()> {
        let failure = self.enter(Operation::Deploy, component).await;
        let mut state = self.state.lock().unwrap();

        if let Some(diagnostics) = failure {
            state
                .deployed
                .entry(component.clone())
                .or_insert_with(|| DeployedComponent {
                    inputs: inputs.clone(),
                    outputs: OutputMap::new(),
                    drift: None,
                });
            return Err(BackendError::Provisioning(diagnostics));
        }

        let outputs = if is_disabled(inputs) {
            OutputMap::new()
        } else {
            let mut outputs: OutputMap = inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(scripted) = state.scripted_outputs.get(&component.component) {
                outputs.extend(scripted.clone());
            }
            outputs
        };

        state.deployed.insert(
            component.clone(),
            DeployedComponent {
                inputs: inputs.clone(),
                outputs,
                drift: None,
            },
        );
        Ok(())
    }

    async fn destroy(&self, component: &ComponentRef, _inputs: &Inputs) -> BackendResult<()> {
        if let Some(diagnostics) = self.enter(Operation::Destroy, component).await {
            return Err(BackendError::Provisioning(diagnostics));
        }
        let mut state = self.state.lock().unwrap();
        state.deployed.remove(component);
        Ok(())
    }

    async fn plan(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<PlanResult> {
        if let Some(diagnostics) = self.enter(Operation::Plan, component).await {
            return Err(BackendError::Provisioning(diagnostics));
        }
        let state = self.state.lock().unwrap();
        let Some(deployed) = state.deployed.get(component) else {
            return Ok(PlanResult::with_changes(format!("+ create {}", component)));
        };
        if let Some(drift) = &deployed.drift {
            return Ok(PlanResult::with_changes(format!("~ {}", drift)));
        }
        let changed = changed_keys(&deployed.inputs, inputs);
        if changed.is_empty() {
            Ok(PlanResult::empty())
        } else {
            Ok(PlanResult::with_changes(
                changed
                    .iter()
                    .map(|k| format!("~ var.{}", k))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }
    }

    async fn outputs(&self, component: &ComponentRef) -> BackendResult<OutputMap> {
        if let Some(diagnostics) = self.enter(Operation::Outputs, component).await {
            return Err(BackendError::Provisioning(diagnostics));
        }
        let state = self.state.lock().unwrap();
        state
            .deployed
            .get(component)
            .map(|d| d.outputs.clone())
            .ok_or_else(|| BackendError::ComponentNotFound(component.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MemoryParameterStore
// ---------------------------------------------------------------------------

/// In-memory parameter store backed by a `HashMap<path, value>`.
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value (stands in for whatever the component wrote).
    pub fn put(&self, path: &str, value: &str) {
        let mut values = self.values.lock().unwrap();
        values.insert(path.to_string(), value.to_string());
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get_parameter(&self, path: &str) -> BackendResult<String> {
        let values = self.values.lock().unwrap();
        values
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::ParameterNotFound(path.to_string()))
    }
}
