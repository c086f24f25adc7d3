//! Suite controller: dependencies, hooks and test cases in one guaranteed-
//! teardown lifecycle.
//!
//! Flow of [`SuiteController::run`]:
//!
//! 1. Resolve the dependency graph and deploy dependencies in order, each
//!    registered in the suite release scope before apply.
//! 2. Run the setup hook.
//! 3. Run test cases (sequentially, or concurrently when configured), each
//!    with its own [`TestContext`] and release scope, drained after the case
//!    no matter how it ended.
//! 4. Run the teardown hook, exactly once.
//! 5. Release the setup scope, then the dependency scope, in reverse order.
//!
//! A dependency or setup failure skips step 3 but never steps 4 and 5.
//! Panics in hooks and test cases are caught and reported like errors.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use infra_harness_backend::{Inputs, OutputMap, PlanResult, ProvisioningBackend};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use crate::assertions::assert_outputs_empty;
use crate::config::HarnessConfig;
use crate::descriptor::ComponentDescriptor;
use crate::drift::DriftVerifier;
use crate::error::{HarnessError, Result};
use crate::executor::{DeploymentHandle, LifecycleExecutor};
use crate::graph::{DependencyEntry, DependencyGraph};
use crate::obs;
use crate::output::OutputResolver;
use crate::random::RandomIdentifier;
use crate::report::{CaseOutcome, CaseReport, DependencyReport, SuitePhase, SuiteReport};
use crate::scope::ReleaseScope;

/// One named test case.
///
/// Components deployed through [`TestContext::deploy`] are destroyed after
/// the case ends, whether it passed, failed or panicked.
#[async_trait]
pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &TestContext<'_>) -> anyhow::Result<()>;
}

/// Suite-level setup and teardown.
///
/// Components deployed from either hook live until the end of the suite.
#[async_trait]
pub trait SuiteHooks: Send + Sync {
    async fn setup(&self, _ctx: &TestContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self, _ctx: &TestContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Dependencies, hooks and test cases, registered before the run.
#[derive(Default)]
pub struct Suite {
    name: String,
    graph: DependencyGraph,
    hooks: Option<Arc<dyn SuiteHooks>>,
    cases: Vec<Arc<dyn TestCase>>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Register a dependency without edges.
    pub fn add_dependency(&mut self, name: &str, descriptor: ComponentDescriptor) -> Result<()> {
        self.graph.register(name, descriptor)
    }

    /// Register a dependency with `depends_on` edges and output bindings.
    pub fn add_dependency_entry(&mut self, entry: DependencyEntry) -> Result<()> {
        self.graph.register_entry(entry)
    }

    /// Feed `upstream.output_key` into `dependent.input_key` at deploy time.
    pub fn bind_output(
        &mut self,
        dependent: &str,
        input_key: &str,
        upstream: &str,
        output_key: &str,
    ) -> Result<()> {
        self.graph
            .bind_output(dependent, input_key, upstream, output_key)
    }

    pub fn with_hooks(mut self, hooks: impl SuiteHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Add a test case; names must be unique within the suite.
    pub fn add_test(&mut self, case: impl TestCase + 'static) -> Result<()> {
        self.add_test_arc(Arc::new(case))
    }

    pub fn add_test_arc(&mut self, case: Arc<dyn TestCase>) -> Result<()> {
        if self.cases.iter().any(|c| c.name() == case.name()) {
            return Err(HarnessError::DuplicateTestCase {
                name: case.name().to_string(),
            });
        }
        self.cases.push(case);
        Ok(())
    }

    /// Test case names in registration order.
    pub fn test_names(&self) -> Vec<&str> {
        self.cases.iter().map(|c| c.name()).collect()
    }
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("dependencies", &self.graph.len())
            .field("hooks", &self.hooks.is_some())
            .field("cases", &self.test_names())
            .finish()
    }
}

/// What a hook or test body sees of the running suite.
pub struct TestContext<'a> {
    name: &'a str,
    executor: &'a LifecycleExecutor,
    random_id: &'a RandomIdentifier,
    config: &'a HarnessConfig,
    dependencies: &'a HashMap<String, DeploymentHandle>,
    scope: &'a ReleaseScope,
}

impl<'a> TestContext<'a> {
    /// Name of the running test case, or `"setup"` / `"teardown"`.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn random_identifier(&self) -> &RandomIdentifier {
        self.random_id
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    pub fn executor(&self) -> &LifecycleExecutor {
        self.executor
    }

    pub fn resolver(&self) -> OutputResolver<'a> {
        OutputResolver::new(self.executor)
    }

    /// Handle of a deployed suite dependency.
    pub fn dependency(&self, name: &str) -> Result<&DeploymentHandle> {
        self.dependencies
            .get(name)
            .ok_or_else(|| HarnessError::UnknownDependency {
                name: name.to_string(),
                referenced_by: Some(self.name.to_string()),
            })
    }

    pub async fn dependency_outputs(&self, name: &str) -> Result<OutputMap> {
        self.outputs(self.dependency(name)?).await
    }

    pub async fn dependency_output(&self, name: &str, key: &str) -> Result<String> {
        self.output(self.dependency(name)?, key).await
    }

    pub async fn dependency_output_struct<T: DeserializeOwned>(
        &self,
        name: &str,
        key: &str,
    ) -> Result<T> {
        self.output_struct(self.dependency(name)?, key).await
    }

    /// Deploy a component; it is destroyed when this context's scope ends.
    ///
    /// If the apply fails the component is still destroyed at scope end.
    pub async fn deploy(&self, descriptor: &ComponentDescriptor) -> Result<DeploymentHandle> {
        let handle = self.executor.reserve(descriptor)?;
        self.scope.register(handle.clone());
        self.executor.apply(&handle).await?;
        Ok(handle)
    }

    /// Destroy a component now instead of at scope end.
    pub async fn destroy(&self, handle: &DeploymentHandle) -> Result<()> {
        self.executor.destroy(handle).await?;
        self.scope.forget(handle.id());
        Ok(())
    }

    pub async fn outputs(&self, handle: &DeploymentHandle) -> Result<OutputMap> {
        self.resolver().outputs(handle).await
    }

    pub async fn output(&self, handle: &DeploymentHandle, key: &str) -> Result<String> {
        self.resolver().output(handle, key).await
    }

    pub async fn output_value(&self, handle: &DeploymentHandle, key: &str) -> Result<Value> {
        self.resolver().output_value(handle, key).await
    }

    pub async fn output_struct<T: DeserializeOwned>(
        &self,
        handle: &DeploymentHandle,
        key: &str,
    ) -> Result<T> {
        self.resolver().output_struct(handle, key).await
    }

    pub async fn plan(&self, descriptor: &ComponentDescriptor) -> Result<PlanResult> {
        DriftVerifier::new(self.executor).plan(descriptor).await
    }

    /// Assert that re-planning a deployed component reports no changes.
    pub async fn drift_test(&self, descriptor: &ComponentDescriptor) -> Result<()> {
        DriftVerifier::new(self.executor)
            .assert_no_drift(descriptor)
            .await
    }

    /// Deploy with `enabled = false`, require no outputs and no drift, destroy.
    pub async fn verify_enabled_flag(
        &self,
        component: &str,
        stack: &str,
        inputs: Inputs,
    ) -> Result<()> {
        let descriptor = ComponentDescriptor::new(component, stack)
            .with_inputs(inputs)
            .with_input("enabled", false);
        let handle = self.deploy(&descriptor).await?;

        let outputs = self.outputs(&handle).await?;
        assert_outputs_empty(&format!("disabled {}", handle.identity()), &outputs)?;
        self.drift_test(&descriptor).await?;

        self.destroy(&handle).await
    }
}

/// Runs [`Suite`]s against one backend with one random identifier.
pub struct SuiteController {
    executor: LifecycleExecutor,
    random_id: RandomIdentifier,
    config: HarnessConfig,
}

impl SuiteController {
    pub fn new(
        backend: Arc<dyn ProvisioningBackend>,
        random_id: RandomIdentifier,
        config: HarnessConfig,
    ) -> Self {
        let executor = LifecycleExecutor::new(backend).with_timeout(config.operation_timeout());
        Self {
            executor,
            random_id,
            config,
        }
    }

    pub fn executor(&self) -> &LifecycleExecutor {
        &self.executor
    }

    pub fn random_identifier(&self) -> &RandomIdentifier {
        &self.random_id
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Destroy every component still live in the executor, newest first.
    ///
    /// `run` releases everything it deploys, but only if it is polled to
    /// completion. After a cancelled or interrupted run, call this to
    /// release what it left behind. Returns every destroy failure; the
    /// failed handles stay live so a later sweep can retry them.
    pub async fn sweep(&self) -> Vec<HarnessError> {
        let handles = self.executor.live_handles();
        if handles.is_empty() {
            return Vec::new();
        }
        warn!(count = handles.len(), "sweeping live components");
        self.executor.destroy_all(&handles).await
    }

    /// Run `suite` to completion. Never skips teardown.
    pub async fn run(&self, suite: &Suite) -> SuiteReport {
        let span = obs::suite_span(suite.name(), self.random_id.as_str());
        self.run_inner(suite).instrument(span).await
    }

    async fn run_inner(&self, suite: &Suite) -> SuiteReport {
        let mut report = SuiteReport::new(suite.name(), self.random_id.as_str());
        obs::emit_suite_started(
            suite.name(),
            self.random_id.as_str(),
            suite.graph.len(),
            suite.cases.len(),
        );
        obs::emit_phase_entered(suite.name(), SuitePhase::Registered);

        let dependency_scope = ReleaseScope::new("dependencies");
        let setup_scope = ReleaseScope::new("setup");
        let mut dependencies = HashMap::new();

        let mut ready = match suite.graph.resolve_order() {
            Ok(order) => {
                self.deploy_dependencies(&order, &dependency_scope, &mut dependencies, &mut report)
                    .await
            }
            Err(err) => {
                report.setup_error = Some(format!("cannot resolve dependencies: {err}"));
                false
            }
        };

        if ready {
            self.enter(&mut report, SuitePhase::DependenciesDeployed);
            if let Some(hooks) = &suite.hooks {
                let ctx = self.context("setup", &dependencies, &setup_scope);
                let result = AssertUnwindSafe(hooks.setup(&ctx)).catch_unwind().await;
                if let Some(err) = hook_error(result) {
                    report.setup_error = Some(err);
                    ready = false;
                }
            }
            self.enter(&mut report, SuitePhase::SetupRun);
        }

        if !ready {
            for case in &suite.cases {
                report
                    .cases
                    .push(CaseReport::skipped(case.name(), "suite setup failed"));
            }
        } else if self.config.skip_tests {
            for case in &suite.cases {
                report
                    .cases
                    .push(CaseReport::skipped(case.name(), "skip_tests is set"));
            }
        } else {
            self.enter(&mut report, SuitePhase::TestsRunning);
            if self.config.parallel_tests {
                let runs = suite
                    .cases
                    .iter()
                    .map(|case| self.run_case(case.as_ref(), &dependencies));
                report.cases.extend(join_all(runs).await);
            } else {
                for case in &suite.cases {
                    let case_report = self.run_case(case.as_ref(), &dependencies).await;
                    report.cases.push(case_report);
                }
            }
        }

        if let Some(hooks) = &suite.hooks {
            let ctx = self.context("teardown", &dependencies, &setup_scope);
            let result = AssertUnwindSafe(hooks.teardown(&ctx)).catch_unwind().await;
            report.teardown_error = hook_error(result);
        }
        self.enter(&mut report, SuitePhase::TeardownRun);

        let skip = self.config.skip_destroy_dependencies;
        let mut cleanup = setup_scope.release(&self.executor, skip).await;
        cleanup.extend(dependency_scope.release(&self.executor, skip).await);
        report
            .cleanup_errors
            .extend(cleanup.iter().map(ToString::to_string));
        self.enter(&mut report, SuitePhase::DependenciesDestroyed);

        self.enter(&mut report, SuitePhase::Done);
        report.finish();
        obs::emit_suite_finished(
            suite.name(),
            report.duration_ms,
            report.passed_count(),
            report.failed_count(),
            report.success,
        );
        report
    }

    /// Deploy dependencies in order, stopping at the first failure.
    async fn deploy_dependencies(
        &self,
        order: &[&DependencyEntry],
        scope: &ReleaseScope,
        deployed: &mut HashMap<String, DeploymentHandle>,
        report: &mut SuiteReport,
    ) -> bool {
        for entry in order {
            let result = self.deploy_dependency(entry, scope, deployed).await;
            let mut dep = DependencyReport {
                name: entry.name.clone(),
                component: entry.descriptor.component.clone(),
                stack: entry.descriptor.stack.clone(),
                deployed: false,
                error: None,
            };
            match result {
                Ok(handle) => {
                    dep.deployed = true;
                    deployed.insert(entry.name.clone(), handle);
                    report.dependencies.push(dep);
                }
                Err(err) => {
                    dep.error = Some(err.to_string());
                    report.dependencies.push(dep);
                    return false;
                }
            }
        }
        true
    }

    async fn deploy_dependency(
        &self,
        entry: &DependencyEntry,
        scope: &ReleaseScope,
        deployed: &HashMap<String, DeploymentHandle>,
    ) -> Result<DeploymentHandle> {
        let mut descriptor = entry.descriptor.clone();
        let resolver = OutputResolver::new(&self.executor);
        for binding in &entry.bindings {
            let upstream =
                deployed
                    .get(&binding.upstream)
                    .ok_or_else(|| HarnessError::UnknownDependency {
                        name: binding.upstream.clone(),
                        referenced_by: Some(entry.name.clone()),
                    })?;
            let value = resolver.output_value(upstream, &binding.output_key).await?;
            descriptor.inputs.insert(binding.input_key.clone(), value);
        }

        let handle = self.executor.reserve(&descriptor)?;
        scope.register(handle.clone());
        if self.config.skip_deploy_dependencies {
            debug!(dependency = %entry.name, "attaching to existing deployment");
            self.executor.adopt(&handle)?;
        } else {
            self.executor.apply(&handle).await?;
        }
        Ok(handle)
    }

    async fn run_case(
        &self,
        case: &dyn TestCase,
        dependencies: &HashMap<String, DeploymentHandle>,
    ) -> CaseReport {
        let scope = ReleaseScope::new(case.name());
        let start = Instant::now();
        let result = {
            let ctx = self.context(case.name(), dependencies, &scope);
            AssertUnwindSafe(case.run(&ctx)).catch_unwind().await
        };
        let outcome = classify(result);

        let cleanup_errors = scope
            .release(&self.executor, self.config.skip_destroy_component)
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_case_finished(case.name(), outcome.label(), duration_ms);

        CaseReport {
            name: case.name().to_string(),
            outcome,
            duration_ms,
            cleanup_errors,
        }
    }

    fn context<'a>(
        &'a self,
        name: &'a str,
        dependencies: &'a HashMap<String, DeploymentHandle>,
        scope: &'a ReleaseScope,
    ) -> TestContext<'a> {
        TestContext {
            name,
            executor: &self.executor,
            random_id: &self.random_id,
            config: &self.config,
            dependencies,
            scope,
        }
    }

    fn enter(&self, report: &mut SuiteReport, phase: SuitePhase) {
        obs::emit_phase_entered(&report.suite_name, phase);
        report.enter(phase);
    }
}

type CaughtResult = std::result::Result<anyhow::Result<()>, Box<dyn Any + Send>>;

fn classify(result: CaughtResult) -> CaseOutcome {
    match result {
        Ok(Ok(())) => CaseOutcome::Passed,
        Ok(Err(err)) => CaseOutcome::Failed {
            assertion: err
                .downcast_ref::<HarnessError>()
                .is_some_and(HarnessError::is_assertion),
            reason: format!("{err:#}"),
        },
        Err(payload) => CaseOutcome::Panicked {
            message: panic_message(payload.as_ref()),
        },
    }
}

fn hook_error(result: CaughtResult) -> Option<String> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
