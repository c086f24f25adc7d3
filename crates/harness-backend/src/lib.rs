//! infra-harness-backend: provisioning contracts for the integration harness
//!
//! This crate is the boundary between the harness and real infrastructure.
//! The orchestrator only ever talks to the traits defined here.
//!
//! ## Layer 0 - Provisioning
//!
//! Focus: faithful pass-through of backend results and diagnostics.
//!
//! ## Key Components
//!
//! - `ProvisioningBackend`: deploy / destroy / plan / outputs of one component
//! - `AtmosBackend`: implementation driving the Atmos CLI
//! - `ParameterStore`: read-only lookups for assertions (`AwsCliParameterStore`)
//! - `fakes`: in-memory implementations for tests

pub mod atmos;
pub mod backend_traits;
mod error;
pub mod fakes;
pub mod parameter_store;
pub mod process;

pub use atmos::{parse_terraform_outputs, AtmosBackend, AtmosConfig};
pub use backend_traits::{
    BackendResult, ComponentRef, Inputs, OutputMap, ParameterStore, PlanResult,
    ProvisioningBackend,
};
pub use error::BackendError;
pub use parameter_store::AwsCliParameterStore;
pub use process::{run_command, CommandOutput, CommandSpec};
