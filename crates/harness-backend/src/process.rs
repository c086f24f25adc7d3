//! External command execution for CLI-driven backends.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::debug;

use crate::backend_traits::BackendResult;
use crate::error::BackendError;

/// A command line to execute.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Executable followed by its arguments.
    pub argv: Vec<String>,

    /// Working directory (inherits the current one when unset).
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }

    /// Printable form of the command line.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, as an operator would see them in a terminal.
    pub fn diagnostics(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            _ => self.stderr.clone(),
        }
    }

    /// Convert a non-zero exit into `BackendError::CommandFailed`.
    pub fn into_failure(self, spec: &CommandSpec) -> BackendError {
        BackendError::CommandFailed {
            command: spec.display(),
            exit_code: self.exit_code,
            diagnostics: self.diagnostics(),
        }
    }
}

/// Run a command to completion and capture its output.
///
/// The child is killed if the returned future is dropped, so an outer
/// timeout does not leave a provisioning process running.
pub async fn run_command(spec: &CommandSpec) -> BackendResult<CommandOutput> {
    let start = Instant::now();

    let Some((exe, args)) = spec.argv.split_first() else {
        return Err(BackendError::MalformedOutput("empty command line".to_string()));
    };

    let mut command = Command::new(exe);
    command
        .args(args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    debug!(command = %spec.display(), "Spawning command");
    let child = command.spawn().map_err(|source| BackendError::Spawn {
        command: spec.display(),
        source,
    })?;
    let output = child.wait_with_output().await?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
