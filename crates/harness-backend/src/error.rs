//! Error types for infra-harness-backend

use thiserror::Error;

/// Errors produced by a provisioning backend or a parameter store.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The provisioning command ran and reported failure.
    ///
    /// `diagnostics` holds the command's captured stdout and stderr verbatim.
    #[error("command `{command}` exited with code {exit_code}:\n{diagnostics}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        diagnostics: String,
    },

    /// The provisioning command could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend has no record of the component.
    #[error("component not deployed in backend: {0}")]
    ComponentNotFound(String),

    /// A parameter lookup found nothing at the given path.
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    /// The backend returned output the harness could not interpret.
    #[error("malformed backend output: {0}")]
    MalformedOutput(String),

    /// Provisioning failed for a reason reported by the backend itself.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Diagnostic text to surface to operators.
    ///
    /// For command failures this is the raw captured output, untouched.
    pub fn diagnostics(&self) -> String {
        match self {
            BackendError::CommandFailed { diagnostics, .. } => diagnostics.clone(),
            BackendError::Provisioning(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
