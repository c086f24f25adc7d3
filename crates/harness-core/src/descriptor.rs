//! Component descriptors: what to deploy, where, and with which inputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use infra_harness_backend::{ComponentRef, Inputs};

use crate::error::{HarnessError, Result};

/// A deployable unit of infrastructure configuration.
///
/// Identity is `(component, stack)`; inputs are an arbitrary JSON tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Component name, e.g. `"acm/basic"`.
    pub component: String,

    /// Stack the component is deployed under, e.g. `"default-test"`.
    pub stack: String,

    /// Input variables.
    #[serde(default)]
    pub inputs: Inputs,
}

impl ComponentDescriptor {
    /// Create a descriptor with no inputs.
    pub fn new(component: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            stack: stack.into(),
            inputs: Inputs::new(),
        }
    }

    /// Replace all inputs.
    pub fn with_inputs(mut self, inputs: Inputs) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set a single input.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Look up an input value.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    /// Whether the component is enabled (`enabled` input absent or not `false`).
    pub fn enabled(&self) -> bool {
        !matches!(self.inputs.get("enabled"), Some(Value::Bool(false)))
    }

    /// `(component, stack)` identity.
    pub fn identity(&self) -> ComponentRef {
        ComponentRef::new(self.component.clone(), self.stack.clone())
    }

    /// SHA-256 over component, stack and canonical inputs.
    ///
    /// Inputs are a sorted map, so the digest does not depend on insertion order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.component.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.stack.as_bytes());
        hasher.update(b"\0");
        hasher.update(Value::Object(self.inputs.clone()).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Convert a JSON value into an input map.
///
/// ```ignore
/// let inputs = inputs_from(json!({ "enabled": true, "domain_name": domain }))?;
/// ```
pub fn inputs_from(value: Value) -> Result<Inputs> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(HarnessError::DecodeError {
            key: "inputs".to_string(),
            reason: format!("expected an object, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_sets_inputs() {
        let d = ComponentDescriptor::new("acm/basic", "default-test")
            .with_input("enabled", true)
            .with_input("validation_method", "DNS");
        assert_eq!(d.input("validation_method"), Some(&json!("DNS")));
        assert!(d.enabled());
        assert_eq!(d.identity().to_string(), "acm/basic@default-test");
    }

    #[test]
    fn test_enabled_flag() {
        let d = ComponentDescriptor::new("acm/disabled", "default-test").with_input("enabled", false);
        assert!(!d.enabled());
        let d = ComponentDescriptor::new("acm/disabled", "default-test").with_input("enabled", "no");
        assert!(d.enabled());
    }

    #[test]
    fn test_digest_is_insertion_order_independent() {
        let a = ComponentDescriptor::new("c", "s")
            .with_input("x", 1)
            .with_input("y", 2);
        let b = ComponentDescriptor::new("c", "s")
            .with_input("y", 2)
            .with_input("x", 1);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_digest_changes_with_inputs_and_stack() {
        let base = ComponentDescriptor::new("c", "s").with_input("x", 1);
        assert_ne!(base.digest(), base.clone().with_input("x", 2).digest());
        assert_ne!(
            base.digest(),
            ComponentDescriptor::new("c", "other").with_input("x", 1).digest()
        );
    }

    #[test]
    fn test_inputs_from_object() {
        let inputs = inputs_from(json!({ "zone_config": [{ "subdomain": "abc" }] })).unwrap();
        assert_eq!(inputs["zone_config"][0]["subdomain"], json!("abc"));
    }

    #[test]
    fn test_inputs_from_non_object_fails() {
        let err = inputs_from(json!([1, 2])).unwrap_err();
        assert!(matches!(err, HarnessError::DecodeError { .. }));
    }

    #[test]
    fn test_descriptor_deserializes_without_inputs() {
        let d: ComponentDescriptor =
            serde_json::from_value(json!({ "component": "vpc", "stack": "default-test" }))
                .unwrap();
        assert!(d.inputs.is_empty());
    }
}
