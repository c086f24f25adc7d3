//! Structured observability hooks for suite lifecycle events.
//!
//! Every event carries an `event` field (`suite.started`,
//! `component.deployed`, ...) so log pipelines can filter on it. Cleanup
//! failures are emitted at `warn!`, everything else at `info!`.

use tracing::{info, warn};

use crate::report::SuitePhase;

/// Span covering one suite run; attach with `tracing::Instrument`.
///
/// ```ignore
/// controller.run_inner(suite).instrument(suite_span("acm", &id)).await
/// ```
pub fn suite_span(suite: &str, random_id: &str) -> tracing::Span {
    tracing::info_span!("harness.suite", suite = %suite, random_id = %random_id)
}

/// Emit event: suite run started.
pub fn emit_suite_started(suite: &str, random_id: &str, dependencies: usize, cases: usize) {
    info!(
        event = "suite.started",
        suite = %suite,
        random_id = %random_id,
        dependencies = dependencies,
        cases = cases,
    );
}

/// Emit event: suite entered a lifecycle phase.
pub fn emit_phase_entered(suite: &str, phase: SuitePhase) {
    info!(event = "suite.phase", suite = %suite, phase = ?phase);
}

pub fn emit_component_deployed(component: &str, stack: &str, duration_ms: u64) {
    info!(
        event = "component.deployed",
        component = %component,
        stack = %stack,
        duration_ms = duration_ms,
    );
}

pub fn emit_component_deploy_failed(component: &str, stack: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "component.deploy_failed",
        component = %component,
        stack = %stack,
        error = %error,
    );
}

pub fn emit_component_destroyed(component: &str, stack: &str, duration_ms: u64) {
    info!(
        event = "component.destroyed",
        component = %component,
        stack = %stack,
        duration_ms = duration_ms,
    );
}

/// Emit event: a cleanup step failed (warning level). The run continues.
pub fn emit_cleanup_error(scope: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.error", scope = %scope, error = %error);
}

/// Emit event: test case finished with its outcome label.
pub fn emit_case_finished(case: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "case.finished",
        case = %case,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_drift_checked(component: &str, stack: &str, has_changes: bool) {
    info!(
        event = "drift.checked",
        component = %component,
        stack = %stack,
        has_changes = has_changes,
    );
}

/// Emit event: suite finished with totals.
pub fn emit_suite_finished(suite: &str, duration_ms: u64, passed: usize, failed: usize, success: bool) {
    info!(
        event = "suite.finished",
        suite = %suite,
        duration_ms = duration_ms,
        passed = passed,
        failed = failed,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_span_create() {
        let span = suite_span("acm", "abc123");
        let _entered = span.enter();
        emit_phase_entered("acm", SuitePhase::Registered);
    }
}
