//! Backend trait definitions for the harness
//!
//! These traits define the external collaborators the orchestrator talks to:
//! - `ProvisioningBackend`: deploy / destroy / plan / outputs of one component
//! - `ParameterStore`: read-only lookups used by assertions
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Input variables handed to a component (a JSON object).
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// Named outputs of a deployed component.
pub type OutputMap = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ProvisioningBackend
// ---------------------------------------------------------------------------

/// Identity of a component instance: the component name within a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Component name, e.g. `"acm/basic"`.
    pub component: String,
    /// Stack (environment) the component is deployed under.
    pub stack: String,
}

impl ComponentRef {
    pub fn new(component: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            stack: stack.into(),
        }
    }
}

impl std::fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.component, self.stack)
    }
}

/// Result of planning a component against its live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Whether applying would change anything.
    pub has_changes: bool,
    /// Human-readable diff as reported by the backend.
    pub diff: String,
}

impl PlanResult {
    /// A plan with nothing to do.
    pub fn empty() -> Self {
        Self {
            has_changes: false,
            diff: String::new(),
        }
    }

    /// A plan that would change resources.
    pub fn with_changes(diff: impl Into<String>) -> Self {
        Self {
            has_changes: true,
            diff: diff.into(),
        }
    }
}

/// Provisioning engine that turns component configuration into resources.
///
/// Guarantees expected from implementations:
/// - `deploy` blocks until the backend reports completion.
/// - `destroy` is safe after a partially failed `deploy`.
/// - `plan` never changes live resources.
/// - `outputs` reflects the last successful `deploy`.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Apply the component with the given inputs.
    async fn deploy(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<()>;

    /// Tear the component down.
    async fn destroy(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<()>;

    /// Compute the changes applying `inputs` would make. Read-only.
    async fn plan(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<PlanResult>;

    /// Fetch every named output of a deployed component.
    async fn outputs(&self, component: &ComponentRef) -> BackendResult<OutputMap>;
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

/// Read-only secret/state store used to cross-check component outputs.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Read the value stored at `path`.
    /// Returns `BackendError::ParameterNotFound` if nothing is stored there.
    async fn get_parameter(&self, path: &str) -> BackendResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_ref_display() {
        let c = ComponentRef::new("acm/basic", "default-test");
        assert_eq!(c.to_string(), "acm/basic@default-test");
    }

    #[test]
    fn plan_result_constructors() {
        assert!(!PlanResult::empty().has_changes);
        let plan = PlanResult::with_changes("~ tags");
        assert!(plan.has_changes);
        assert_eq!(plan.diff, "~ tags");
    }
}
