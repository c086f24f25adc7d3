//! Atmos CLI provisioning backend
//!
//! Drives `atmos terraform <subcommand> <component> -s <stack>` for every
//! lifecycle operation. Inputs are written to a temporary `*.tfvars.json`
//! file that lives exactly as long as the command that reads it.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::backend_traits::{
    BackendResult, ComponentRef, Inputs, OutputMap, PlanResult, ProvisioningBackend,
};
use crate::error::BackendError;
use crate::process::{run_command, CommandSpec};

/// Exit code of `terraform plan -detailed-exitcode` when changes are pending.
const PLAN_EXIT_CHANGES: i32 = 2;

/// Configuration for [`AtmosBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosConfig {
    /// Path or name of the `atmos` executable.
    pub binary: PathBuf,

    /// Atmos base path (exported as `ATMOS_BASE_PATH` and used as cwd).
    pub base_path: Option<PathBuf>,

    /// Extra environment variables for every invocation.
    pub env: BTreeMap<String, String>,
}

impl Default for AtmosConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("atmos"),
            base_path: None,
            env: BTreeMap::new(),
        }
    }
}

/// Backend that shells out to the Atmos CLI.
#[derive(Debug, Clone, Default)]
pub struct AtmosBackend {
    config: AtmosConfig,
}

impl AtmosBackend {
    pub fn new(config: AtmosConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AtmosConfig {
        &self.config
    }

    /// Build `atmos terraform <subcommand> <component> -s <stack> [extra...]`.
    fn command(&self, subcommand: &str, component: &ComponentRef, extra: &[&str]) -> CommandSpec {
        let mut argv = vec![
            self.config.binary.to_string_lossy().to_string(),
            "terraform".to_string(),
            subcommand.to_string(),
            component.component.clone(),
            "-s".to_string(),
            component.stack.clone(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));

        let mut env = self.config.env.clone();
        if let Some(base) = &self.config.base_path {
            env.insert(
                "ATMOS_BASE_PATH".to_string(),
                base.to_string_lossy().to_string(),
            );
        }

        CommandSpec {
            argv,
            cwd: self.config.base_path.clone(),
            env,
        }
    }

    /// Like [`command`](Self::command) with `-var-file` pointing at a fresh var-file.
    ///
    /// The returned file must be kept alive until the command finishes.
    fn command_with_vars(
        &self,
        subcommand: &str,
        component: &ComponentRef,
        inputs: &Inputs,
        extra: &[&str],
    ) -> BackendResult<(CommandSpec, NamedTempFile)> {
        let varfile = write_varfile(inputs)?;
        let path = varfile.path().to_string_lossy().to_string();
        let mut args: Vec<&str> = extra.to_vec();
        args.push("-var-file");
        args.push(&path);
        Ok((self.command(subcommand, component, &args), varfile))
    }
}

#[async_trait]
impl ProvisioningBackend for AtmosBackend {
    async fn deploy(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<()> {
        let (spec, _varfile) = self.command_with_vars("deploy", component, inputs, &[])?;
        info!(component = %component, "atmos deploy");
        let out = run_command(&spec).await?;
        if !out.success() {
            return Err(out.into_failure(&spec));
        }
        debug!(component = %component, duration_ms = out.duration_ms, "atmos deploy finished");
        Ok(())
    }

    async fn destroy(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<()> {
        let (spec, _varfile) =
            self.command_with_vars("destroy", component, inputs, &["-auto-approve"])?;
        info!(component = %component, "atmos destroy");
        let out = run_command(&spec).await?;
        if !out.success() {
            return Err(out.into_failure(&spec));
        }
        Ok(())
    }

    async fn plan(&self, component: &ComponentRef, inputs: &Inputs) -> BackendResult<PlanResult> {
        let (spec, _varfile) =
            self.command_with_vars("plan", component, inputs, &["-detailed-exitcode"])?;
        info!(component = %component, "atmos plan");
        let out = run_command(&spec).await?;
        match out.exit_code {
            0 => Ok(PlanResult::empty()),
            PLAN_EXIT_CHANGES => Ok(PlanResult::with_changes(out.stdout)),
            _ => Err(out.into_failure(&spec)),
        }
    }

    async fn outputs(&self, component: &ComponentRef) -> BackendResult<OutputMap> {
        let spec = self.command("output", component, &["--skip-init", "-json"]);
        let out = run_command(&spec).await?;
        if !out.success() {
            return Err(out.into_failure(&spec));
        }
        parse_terraform_outputs(&out.stdout)
    }
}

fn write_varfile(inputs: &Inputs) -> BackendResult<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("harness-")
        .suffix(".tfvars.json")
        .tempfile()?;
    let body = serde_json::to_vec_pretty(inputs)?;
    file.write_all(&body)?;
    file.flush()?;
    Ok(file)
}

/// Parse `terraform output -json` into a name → value map.
///
/// Atmos may print log lines around the JSON document. The document is the
/// first line-leading `{` from which a JSON object parses; braces inside log
/// lines are skipped.
pub fn parse_terraform_outputs(stdout: &str) -> BackendResult<OutputMap> {
    if stdout.trim().is_empty() {
        return Ok(OutputMap::new());
    }
    let raw = line_leading_braces(stdout)
        .find_map(|start| {
            serde_json::Deserializer::from_str(&stdout[start..])
                .into_iter::<BTreeMap<String, serde_json::Value>>()
                .next()
                .and_then(Result::ok)
        })
        .ok_or_else(|| {
            BackendError::MalformedOutput(format!("no JSON object in output: {}", stdout.trim()))
        })?;

    raw.into_iter()
        .map(|(name, entry)| match entry.get("value") {
            Some(value) => Ok((name, value.clone())),
            None => Err(BackendError::MalformedOutput(format!(
                "output '{}' has no value field",
                name
            ))),
        })
        .collect()
}

/// Byte offsets of every `{` that is the first non-blank character of a line.
fn line_leading_braces(text: &str) -> impl Iterator<Item = usize> + '_ {
    let mut offset = 0;
    text.split_inclusive('\n').filter_map(move |line| {
        let start = offset;
        offset += line.len();
        let indent = line.len() - line.trim_start().len();
        line.trim_start()
            .starts_with('{')
            .then_some(start + indent)
    })
}
