use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Suite lifecycle phases, entered strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuitePhase {
    Registered,
    DependenciesDeployed,
    SetupRun,
    TestsRunning,
    TeardownRun,
    DependenciesDestroyed,
    Done,
}

/// How a single test case ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    /// Returned an error; `assertion` is set for assertion failures.
    Failed { reason: String, assertion: bool },
    Panicked { message: String },
    Skipped { reason: String },
}

impl CaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CaseOutcome::Passed => "passed",
            CaseOutcome::Failed { .. } => "failed",
            CaseOutcome::Panicked { .. } => "panicked",
            CaseOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CaseOutcome::Failed { .. } | CaseOutcome::Panicked { .. })
    }
}

/// Result of one test case, including cleanup of what it deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
    #[serde(default)]
    pub cleanup_errors: Vec<String>,
}

impl CaseReport {
    pub fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: CaseOutcome::Skipped {
                reason: reason.to_string(),
            },
            duration_ms: 0,
            cleanup_errors: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.outcome.is_failure() && self.cleanup_errors.is_empty()
    }
}

/// Deployment result of one suite dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub name: String,
    pub component: String,
    pub stack: String,
    pub deployed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted outcome of one suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub schema_version: String,
    pub suite_name: String,
    pub random_identifier: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub phases: Vec<SuitePhase>,
    pub dependencies: Vec<DependencyReport>,
    pub cases: Vec<CaseReport>,
    pub setup_error: Option<String>,
    pub teardown_error: Option<String>,
    pub cleanup_errors: Vec<String>,
    pub success: bool,
}

impl SuiteReport {
    pub fn new(suite_name: &str, random_identifier: &str) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            suite_name: suite_name.to_string(),
            random_identifier: random_identifier.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            phases: vec![SuitePhase::Registered],
            dependencies: Vec::new(),
            cases: Vec::new(),
            setup_error: None,
            teardown_error: None,
            cleanup_errors: Vec::new(),
            success: false,
        }
    }

    pub fn enter(&mut self, phase: SuitePhase) {
        self.phases.push(phase);
    }

    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn passed_count(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| c.outcome == CaseOutcome::Passed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.outcome.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| matches!(c.outcome, CaseOutcome::Skipped { .. }))
            .count()
    }

    /// Stamp the finish time and compute `success`.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
        self.success = self.setup_error.is_none()
            && self.teardown_error.is_none()
            && self.cleanup_errors.is_empty()
            && self.dependencies.iter().all(|d| d.deployed)
            && self.cases.iter().all(CaseReport::succeeded);
    }
}

/// Write the suite report as pretty JSON.
pub fn write_report_json(path: &Path, report: &SuiteReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize suite report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a markdown summary for CI job output.
pub fn render_report_md(report: &SuiteReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Suite `{}`\n\n", report.suite_name));
    out.push_str(&format!(
        "- result: {}\n- random identifier: `{}`\n- passed: {}\n- failed: {}\n- skipped: {}\n\n",
        if report.success { "PASS" } else { "FAIL" },
        report.random_identifier,
        report.passed_count(),
        report.failed_count(),
        report.skipped_count()
    ));

    if !report.dependencies.is_empty() {
        out.push_str("## Dependencies\n");
        for d in &report.dependencies {
            let status = if d.deployed { "deployed" } else { "failed" };
            out.push_str(&format!(
                "- `{}` ({}@{}): {}\n",
                d.name, d.component, d.stack, status
            ));
        }
        out.push('\n');
    }

    if !report.cases.is_empty() {
        out.push_str("## Cases\n");
        for c in &report.cases {
            out.push_str(&format!("- `{}`: {}", c.name, c.outcome.label()));
            match &c.outcome {
                CaseOutcome::Failed { reason, .. } => out.push_str(&format!(" ({})", first_line(reason))),
                CaseOutcome::Panicked { message } => out.push_str(&format!(" ({})", first_line(message))),
                CaseOutcome::Skipped { reason } => out.push_str(&format!(" ({})", reason)),
                CaseOutcome::Passed => {}
            }
            out.push('\n');
        }
        out.push('\n');
    }

    let errors: Vec<&String> = report
        .setup_error
        .iter()
        .chain(report.teardown_error.iter())
        .chain(report.cleanup_errors.iter())
        .chain(report.cases.iter().flat_map(|c| c.cleanup_errors.iter()))
        .collect();
    if !errors.is_empty() {
        out.push_str("## Errors\n");
        for e in errors {
            out.push_str(&format!("- {}\n", first_line(e)));
        }
    }
    out
}

/// Write the markdown summary.
pub fn write_report_md(path: &Path, report: &SuiteReport) -> Result<()> {
    let md = render_report_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
