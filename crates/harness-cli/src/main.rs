//! infra-harness - integration test runner for infrastructure components
//!
//! ## Commands
//!
//! - `run`: deploy a suite's dependencies, run its test cases, tear down
//! - `plan`: print the dependency deployment and teardown order
//! - `validate`: check a manifest without touching any backend
//!
//! Configuration comes from `HARNESS_*` environment variables, overridden by
//! command-line flags.

mod manifest;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use infra_harness_backend::{AtmosBackend, AwsCliParameterStore};
use infra_harness_core::{
    render_report_md, write_report_json, write_report_md, HarnessConfig, ParameterStore,
    RandomIdentifier, Suite, SuiteController, SuiteReport,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};

use crate::manifest::SuiteManifest;

#[derive(Parser)]
#[command(name = "infra-harness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Integration test harness for infrastructure components", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite manifest against the Atmos backend
    Run {
        /// Path to the suite manifest (JSON)
        manifest: PathBuf,

        #[command(flatten)]
        overrides: RunOverrides,

        /// Also write a markdown summary to this path
        #[arg(long)]
        markdown: Option<PathBuf>,
    },

    /// Print the dependency deployment and teardown order
    Plan {
        /// Path to the suite manifest (JSON)
        manifest: PathBuf,
    },

    /// Check a manifest for duplicate names, cycles and unknown references
    Validate {
        /// Path to the suite manifest (JSON)
        manifest: PathBuf,
    },
}

/// Flags layered over `HARNESS_*` configuration.
#[derive(clap::Args, Debug, Default)]
struct RunOverrides {
    /// Atmos executable
    #[arg(long)]
    atmos_bin: Option<PathBuf>,

    /// Atmos base path (stacks and components)
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Reuse a random identifier from an earlier run
    #[arg(long)]
    random_identifier: Option<String>,

    /// Seconds per backend call (0 disables)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Write the JSON suite report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Run test cases concurrently
    #[arg(long)]
    parallel: bool,

    /// Deploy and destroy dependencies without running test cases
    #[arg(long)]
    skip_tests: bool,

    /// Attach to dependencies deployed by an earlier run
    #[arg(long)]
    skip_deploy_dependencies: bool,

    /// Leave dependencies deployed
    #[arg(long)]
    skip_destroy_dependencies: bool,

    /// Leave components under test deployed
    #[arg(long)]
    skip_destroy_component: bool,
}

impl RunOverrides {
    fn apply(self, config: &mut HarnessConfig) {
        if let Some(bin) = self.atmos_bin {
            config.atmos.binary = bin;
        }
        if let Some(base) = self.base_path {
            config.atmos.base_path = Some(base);
        }
        if let Some(id) = self.random_identifier {
            config.random_identifier = Some(id);
        }
        if let Some(secs) = self.timeout_secs {
            config.operation_timeout_secs = secs;
        }
        if let Some(report) = self.report {
            config.report_path = Some(report);
        }
        config.parallel_tests |= self.parallel;
        config.skip_tests |= self.skip_tests;
        config.skip_deploy_dependencies |= self.skip_deploy_dependencies;
        config.skip_destroy_dependencies |= self.skip_destroy_dependencies;
        config.skip_destroy_component |= self.skip_destroy_component;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    infra_harness_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            manifest,
            overrides,
            markdown,
        } => {
            let mut config =
                HarnessConfig::from_env().context("Failed to read HARNESS_* configuration")?;
            overrides.apply(&mut config);
            cmd_run(&manifest, config, markdown.as_deref()).await
        }
        Commands::Plan { manifest } => {
            let manifest = SuiteManifest::load(&manifest)?;
            for line in cmd_plan(&manifest)? {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Validate { manifest } => {
            let manifest = SuiteManifest::load(&manifest)?;
            println!("{}", cmd_validate(&manifest)?);
            Ok(())
        }
    }
}

async fn cmd_run(manifest_path: &Path, config: HarnessConfig, markdown: Option<&Path>) -> Result<()> {
    let manifest = SuiteManifest::load(manifest_path)?;
    let random = config.random_identifier()?;
    info!(suite = %manifest.name, random_id = %random, "Running suite");

    let store = manifest
        .region
        .as_ref()
        .map(|region| Arc::new(AwsCliParameterStore::new(region.clone())) as Arc<dyn ParameterStore>);
    let suite = manifest.to_suite(&random, store)?;
    let backend = Arc::new(AtmosBackend::new(config.atmos.clone()));

    let report_path = config.report_path.clone();
    let controller = SuiteController::new(backend, random, config);
    let report = run_until_interrupted(&controller, &suite, tokio::signal::ctrl_c()).await?;

    if let Some(path) = &report_path {
        write_report_json(path, &report)?;
        info!("Wrote suite report to {:?}", path);
    }
    if let Some(path) = markdown {
        write_report_md(path, &report)?;
    }
    print!("{}", render_report_md(&report));

    if !report.success {
        bail!(
            "suite '{}' failed ({} passed, {} failed, {} skipped, {} cleanup errors)",
            report.suite_name,
            report.passed_count(),
            report.failed_count(),
            report.skipped_count(),
            report.cleanup_errors.len()
        );
    }
    Ok(())
}

/// Run `suite`, or stop at `interrupt` and sweep whatever the run left live.
async fn run_until_interrupted(
    controller: &SuiteController,
    suite: &Suite,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> Result<SuiteReport> {
    tokio::select! {
        biased;
        signal = interrupt => {
            signal.context("listen for interrupt")?;
            warn!(suite = %suite.name(), "interrupted, destroying live components");
            let failures = controller.sweep().await;
            for failure in &failures {
                error!("{}", failure);
            }
            bail!(
                "suite '{}' interrupted ({} components could not be destroyed)",
                suite.name(),
                failures.len()
            )
        }
        report = controller.run(suite) => Ok(report),
    }
}

/// Deployment order followed by teardown order, one line each.
fn cmd_plan(manifest: &SuiteManifest) -> Result<Vec<String>> {
    let suite = manifest.to_suite(&RandomIdentifier::generate(), None)?;
    let order = suite.graph().resolve_order()?;

    let mut lines = vec![format!("Suite {}: {} dependencies", suite.name(), order.len())];
    lines.push("Deploy:".to_string());
    for (i, entry) in order.iter().enumerate() {
        lines.push(format!(
            "  {}. {} ({})",
            i + 1,
            entry.name,
            entry.descriptor.identity()
        ));
    }
    lines.push("Destroy:".to_string());
    for (i, entry) in order.iter().rev().enumerate() {
        lines.push(format!("  {}. {}", i + 1, entry.name));
    }
    lines.push(format!("Tests: {}", suite.test_names().join(", ")));
    Ok(lines)
}

fn cmd_validate(manifest: &SuiteManifest) -> Result<String> {
    manifest
        .validate()
        .with_context(|| format!("manifest for suite '{}' is invalid", manifest.name))?;
    Ok(format!(
        "Manifest OK: {} dependencies, {} tests",
        manifest.dependencies.len(),
        manifest.tests.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_manifest(dir: &Path, value: serde_json::Value) -> PathBuf {
        let path = dir.join("suite.json");
        std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
        path
    }

    fn chain_manifest() -> serde_json::Value {
        json!({
            "name": "eks",
            "dependencies": [
                { "name": "cluster", "component": "eks/cluster", "stack": "default-test", "depends_on": ["vpc"] },
                { "name": "vpc", "component": "vpc", "stack": "default-test" }
            ],
            "tests": [
                { "name": "basic", "component": "eks/node-group", "stack": "default-test" }
            ]
        })
    }

    #[test]
    fn test_plan_lists_deploy_then_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = SuiteManifest::load(&write_manifest(dir.path(), chain_manifest())).unwrap();

        let lines = cmd_plan(&manifest).unwrap();
        assert_eq!(
            lines,
            vec![
                "Suite eks: 2 dependencies",
                "Deploy:",
                "  1. vpc (vpc@default-test)",
                "  2. cluster (eks/cluster@default-test)",
                "Destroy:",
                "  1. cluster",
                "  2. vpc",
                "Tests: basic",
            ]
        );
    }

    #[test]
    fn test_validate_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = chain_manifest();
        value["dependencies"][1]["depends_on"] = json!(["cluster"]);
        let manifest = SuiteManifest::load(&write_manifest(dir.path(), value)).unwrap();

        let err = cmd_validate(&manifest).unwrap_err();
        assert!(format!("{err:#}").contains("cycle"));
    }

    #[test]
    fn test_validate_ok() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = SuiteManifest::load(&write_manifest(dir.path(), chain_manifest())).unwrap();
        assert_eq!(
            cmd_validate(&manifest).unwrap(),
            "Manifest OK: 2 dependencies, 1 tests"
        );
    }

    #[test]
    fn test_load_rejects_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ \"name\": ").unwrap();
        let err = SuiteManifest::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse manifest"));
    }

    #[test]
    fn test_overrides_layer_over_config() {
        let mut config = HarnessConfig::from_vars([("HARNESS_SKIP_TESTS", "1")]).unwrap();
        RunOverrides {
            base_path: Some(PathBuf::from("/work")),
            timeout_secs: Some(0),
            parallel: true,
            ..Default::default()
        }
        .apply(&mut config);

        assert!(config.skip_tests);
        assert!(config.parallel_tests);
        assert_eq!(config.atmos.base_path, Some(PathBuf::from("/work")));
        assert_eq!(config.operation_timeout(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_sweeps_live_components() {
        use infra_harness_backend::fakes::{MemoryBackend, Operation};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let manifest = SuiteManifest::load(&write_manifest(dir.path(), chain_manifest())).unwrap();
        let random = RandomIdentifier::new("abc123").unwrap();
        let suite = manifest.to_suite(&random, None).unwrap();

        let backend = Arc::new(MemoryBackend::new());
        backend.delay(Operation::Deploy, Duration::from_secs(10));
        let controller = SuiteController::new(backend.clone(), random, HarnessConfig::default());

        // vpc is up at 10s; cluster is mid-deploy when the interrupt lands.
        let interrupt = async {
            tokio::time::sleep(Duration::from_secs(15)).await;
            Ok(())
        };
        let err = run_until_interrupted(&controller, &suite, interrupt)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("interrupted (0 components"), "{err}");
        assert!(backend.deployed().is_empty());
        assert_eq!(controller.executor().live_count(), 0);
        assert_eq!(
            backend
                .calls_for(Operation::Destroy)
                .into_iter()
                .map(|c| c.component)
                .collect::<Vec<_>>(),
            vec!["eks/cluster", "vpc"]
        );
    }

    #[tokio::test]
    async fn test_uninterrupted_run_returns_report() {
        use infra_harness_backend::fakes::MemoryBackend;

        let dir = tempfile::tempdir().unwrap();
        let manifest = SuiteManifest::load(&write_manifest(dir.path(), chain_manifest())).unwrap();
        let random = RandomIdentifier::new("abc123").unwrap();
        let suite = manifest.to_suite(&random, None).unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let controller = SuiteController::new(backend.clone(), random, HarnessConfig::default());

        let report = run_until_interrupted(&controller, &suite, std::future::pending())
            .await
            .unwrap();
        assert!(report.success, "{report:#?}");
        assert!(backend.deployed().is_empty());
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "infra-harness",
            "run",
            "suite.json",
            "--parallel",
            "--skip-destroy-dependencies",
            "--report",
            "out.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { overrides, .. } => {
                assert!(overrides.parallel);
                assert!(overrides.skip_destroy_dependencies);
                assert_eq!(overrides.report, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected run"),
        }
    }
}
