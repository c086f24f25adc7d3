//! Output resolution for deployed components.

use infra_harness_backend::OutputMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarnessError, Result};
use crate::executor::{DeploymentHandle, LifecycleExecutor};

/// One DNS validation record of a certificate, as exported by ACM components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOption {
    pub domain_name: String,
    pub resource_record_name: String,
    pub resource_record_type: String,
    pub resource_record_value: String,
}

/// Reads outputs of applied handles through the executor's backend.
#[derive(Debug, Clone, Copy)]
pub struct OutputResolver<'a> {
    executor: &'a LifecycleExecutor,
}

impl<'a> OutputResolver<'a> {
    pub fn new(executor: &'a LifecycleExecutor) -> Self {
        Self { executor }
    }

    /// Every output of `handle`.
    pub async fn outputs(&self, handle: &DeploymentHandle) -> Result<OutputMap> {
        self.executor.ensure_applied(handle)?;
        let key = handle.identity();
        self.executor
            .bounded("outputs", &key, async {
                self.executor
                    .backend()
                    .outputs(&key)
                    .await
                    .map_err(HarnessError::from)
            })
            .await
    }

    /// Raw value of output `key`.
    pub async fn output_value(&self, handle: &DeploymentHandle, key: &str) -> Result<Value> {
        let mut outputs = self.outputs(handle).await?;
        outputs
            .remove(key)
            .ok_or_else(|| HarnessError::OutputNotFound {
                component: handle.component().to_string(),
                stack: handle.stack().to_string(),
                key: key.to_string(),
            })
    }

    /// Output `key` rendered as a string (see [`render_output`]).
    pub async fn output(&self, handle: &DeploymentHandle, key: &str) -> Result<String> {
        Ok(render_output(&self.output_value(handle, key).await?))
    }

    /// Output `key` decoded into `T`.
    pub async fn output_struct<T: DeserializeOwned>(
        &self,
        handle: &DeploymentHandle,
        key: &str,
    ) -> Result<T> {
        decode_output(key, self.output_value(handle, key).await?)
    }
}

/// Scalar view of an output value.
///
/// Strings verbatim, numbers and booleans in their JSON form, `null` as the
/// empty string, sequences and maps as compact JSON.
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decode an output value into `T`, naming `key` in the error.
pub fn decode_output<T: DeserializeOwned>(key: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| HarnessError::DecodeError {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
