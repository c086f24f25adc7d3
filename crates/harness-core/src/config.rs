//! Harness configuration.
//!
//! Defaults come from [`HarnessConfig::default`]; [`HarnessConfig::from_env`]
//! overlays `HARNESS_*` environment variables. The CLI overlays its own
//! flags on top of that.

use std::path::PathBuf;
use std::time::Duration;

use infra_harness_backend::AtmosConfig;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::random::RandomIdentifier;

/// Default bound on a single backend call (one hour, like a slow `apply`).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How to invoke the provisioning CLI.
    pub atmos: AtmosConfig,
    /// Seconds per backend call; `0` disables the bound.
    pub operation_timeout_secs: u64,
    /// Fixed random identifier, to reattach to a previous run's resources.
    pub random_identifier: Option<String>,
    /// Run test cases concurrently.
    pub parallel_tests: bool,
    /// Attach to already-deployed dependencies instead of deploying them.
    pub skip_deploy_dependencies: bool,
    /// Leave dependencies deployed after the suite.
    pub skip_destroy_dependencies: bool,
    /// Leave components deployed by test cases in place.
    pub skip_destroy_component: bool,
    /// Deploy and tear down, but do not run test cases.
    pub skip_tests: bool,
    /// Where to write the JSON suite report.
    pub report_path: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            atmos: AtmosConfig::default(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            random_identifier: None,
            parallel_tests: false,
            skip_deploy_dependencies: false,
            skip_destroy_dependencies: false,
            skip_destroy_component: false,
            skip_tests: false,
            report_path: None,
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with `HARNESS_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overlaid with `HARNESS_*` variables from `vars`.
    ///
    /// Unknown `HARNESS_*` names are ignored; malformed values are errors.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let key = key.as_ref();
            let value: String = value.into();
            match key {
                "HARNESS_ATMOS_BIN" => config.atmos.binary = PathBuf::from(value),
                "HARNESS_ATMOS_BASE_PATH" => config.atmos.base_path = Some(PathBuf::from(value)),
                "HARNESS_OPERATION_TIMEOUT_SECS" => {
                    config.operation_timeout_secs = value.trim().parse().map_err(|_| {
                        HarnessError::Config(format!("{key}: expected seconds, got {value:?}"))
                    })?
                }
                "HARNESS_RANDOM_IDENTIFIER" => {
                    RandomIdentifier::new(value.as_str())?;
                    config.random_identifier = Some(value)
                }
                "HARNESS_PARALLEL_TESTS" => config.parallel_tests = parse_flag(key, &value)?,
                "HARNESS_SKIP_DEPLOY_DEPENDENCIES" => {
                    config.skip_deploy_dependencies = parse_flag(key, &value)?
                }
                "HARNESS_SKIP_DESTROY_DEPENDENCIES" => {
                    config.skip_destroy_dependencies = parse_flag(key, &value)?
                }
                "HARNESS_SKIP_DESTROY_COMPONENT" => {
                    config.skip_destroy_component = parse_flag(key, &value)?
                }
                "HARNESS_SKIP_TESTS" => config.skip_tests = parse_flag(key, &value)?,
                "HARNESS_REPORT_PATH" => config.report_path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(config)
    }

    /// Per-call backend timeout, `None` when disabled.
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }

    /// The configured identifier, or a freshly generated one.
    pub fn random_identifier(&self) -> Result<RandomIdentifier> {
        match &self.random_identifier {
            Some(id) => RandomIdentifier::new(id.as_str()),
            None => Ok(RandomIdentifier::generate()),
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(HarnessError::Config(format!(
            "{key}: expected a boolean, got {value:?}"
        ))),
    }
}
