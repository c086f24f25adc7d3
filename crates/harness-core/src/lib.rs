//! infra-harness core library
//!
//! Dependency-aware component lifecycle orchestrator: deploys a component's
//! dependencies in order, threads their outputs into dependents and test
//! cases, and tears everything down in reverse order whatever the outcome.

pub mod assertions;
pub mod config;
pub mod descriptor;
pub mod drift;
mod error;
pub mod executor;
pub mod graph;
pub mod obs;
pub mod output;
pub mod random;
pub mod report;
pub mod scope;
pub mod suite;
pub mod telemetry;

pub use config::HarnessConfig;
pub use descriptor::{inputs_from, ComponentDescriptor, ComponentRef, Inputs};
pub use drift::DriftVerifier;
pub use error::{HarnessError, Result};
pub use executor::{DeploymentHandle, HandleState, LifecycleExecutor};
pub use graph::{DependencyEntry, DependencyGraph, OutputBinding};
pub use output::{render_output, OutputResolver, ValidationOption};
pub use random::RandomIdentifier;
pub use report::{
    render_report_md, write_report_json, write_report_md, CaseOutcome, CaseReport,
    DependencyReport, SuitePhase, SuiteReport,
};
pub use scope::ReleaseScope;
pub use suite::{Suite, SuiteController, SuiteHooks, TestCase, TestContext};

pub use infra_harness_backend::{
    OutputMap, ParameterStore, PlanResult, ProvisioningBackend,
};

pub use telemetry::init_tracing;
