//! Error taxonomy for the lifecycle orchestrator.

use infra_harness_backend::BackendError;

/// Harness errors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("dependency '{name}' is already registered")]
    DuplicateDependency { name: String },

    #[error("unknown dependency '{name}'{}", referenced_by.as_ref().map(|r| format!(" (referenced by '{}')", r)).unwrap_or_default())]
    UnknownDependency {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("dependency cycle detected: {}", names.join(" -> "))]
    DependencyCycle { names: Vec<String> },

    #[error("test case '{name}' is already registered")]
    DuplicateTestCase { name: String },

    #[error("component {component} in stack {stack} is already deployed")]
    AlreadyDeployed { component: String, stack: String },

    #[error("component {component} in stack {stack} is not deployed")]
    NotDeployed { component: String, stack: String },

    #[error("deploy of {component} in stack {stack} failed:\n{diagnostics}")]
    DeployFailed {
        component: String,
        stack: String,
        diagnostics: String,
    },

    #[error("destroy of {component} in stack {stack} failed: {reason}")]
    DestroyFailed {
        component: String,
        stack: String,
        reason: String,
    },

    #[error("output '{key}' not found on {component} in stack {stack}")]
    OutputNotFound {
        component: String,
        stack: String,
        key: String,
    },

    #[error("cannot decode output '{key}': {reason}")]
    DecodeError { key: String, reason: String },

    #[error("drift detected on {component} in stack {stack}:\n{diff}")]
    DriftDetected {
        component: String,
        stack: String,
        diff: String,
    },

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("{operation} of {component} timed out after {seconds:.1}s")]
    Timeout {
        operation: String,
        component: String,
        seconds: f64,
    },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error is a test-level assertion failure.
    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::AssertionFailed(_))
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
