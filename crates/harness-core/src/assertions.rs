//! Assertion helpers for test bodies.
//!
//! Each helper returns [`HarnessError::AssertionFailed`] so the suite report
//! can tell assertion failures from infrastructure errors.

use std::fmt::Debug;

use infra_harness_backend::{OutputMap, ParameterStore};

use crate::error::{HarnessError, Result};
use crate::executor::DeploymentHandle;
use crate::output::OutputResolver;

pub fn assert_equal<T: PartialEq + Debug + ?Sized>(what: &str, expected: &T, actual: &T) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed(format!(
            "{what}: expected {expected:?}, got {actual:?}"
        )))
    }
}

pub fn assert_not_empty(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(HarnessError::AssertionFailed(format!("{what} is empty")))
    } else {
        Ok(())
    }
}

/// A disabled component must not export anything.
pub fn assert_outputs_empty(what: &str, outputs: &OutputMap) -> Result<()> {
    if outputs.is_empty() {
        Ok(())
    } else {
        let keys: Vec<&str> = outputs.keys().map(String::as_str).collect();
        Err(HarnessError::AssertionFailed(format!(
            "{what}: expected no outputs, got {}",
            keys.join(", ")
        )))
    }
}

/// Output `key` of `handle`, rendered as a string, equals `expected`.
pub async fn assert_output_equals(
    resolver: &OutputResolver<'_>,
    handle: &DeploymentHandle,
    key: &str,
    expected: &str,
) -> Result<()> {
    let actual = resolver.output(handle, key).await?;
    assert_equal(&format!("output {key} of {}", handle.identity()), expected, actual.as_str())
}

/// The value stored at `path` equals `expected`.
pub async fn assert_parameter_equals(
    store: &dyn ParameterStore,
    path: &str,
    expected: &str,
) -> Result<()> {
    let actual = store.get_parameter(path).await?;
    assert_equal(&format!("parameter {path}"), expected, actual.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ComponentDescriptor;
    use crate::executor::LifecycleExecutor;
    use infra_harness_backend::fakes::{MemoryBackend, MemoryParameterStore};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_assert_equal_message() {
        assert!(assert_equal("arn", "a", "a").is_ok());
        let err = assert_equal("arn", "a", "b").unwrap_err();
        assert!(err.is_assertion());
        assert_eq!(err.to_string(), r#"assertion failed: arn: expected "a", got "b""#);
    }

    #[test]
    fn test_assert_not_empty() {
        assert!(assert_not_empty("arn", "arn:aws:acm:1").is_ok());
        assert!(assert_not_empty("arn", "").unwrap_err().is_assertion());
    }

    #[test]
    fn test_assert_outputs_empty_lists_keys() {
        let mut outputs = OutputMap::new();
        assert!(assert_outputs_empty("acm", &outputs).is_ok());
        outputs.insert("arn".to_string(), json!("x"));
        let err = assert_outputs_empty("acm", &outputs).unwrap_err();
        assert!(err.to_string().contains("arn"));
    }

    #[tokio::test]
    async fn test_assert_output_equals() {
        let executor = LifecycleExecutor::new(Arc::new(MemoryBackend::new()));
        let handle = executor
            .deploy(&ComponentDescriptor::new("acm", "s").with_input("domain_name", "a.example.com"))
            .await
            .unwrap();
        let resolver = OutputResolver::new(&executor);
        assert_output_equals(&resolver, &handle, "domain_name", "a.example.com")
            .await
            .unwrap();
        let err = assert_output_equals(&resolver, &handle, "domain_name", "b.example.com")
            .await
            .unwrap_err();
        assert!(err.is_assertion());
    }

    #[tokio::test]
    async fn test_assert_parameter_equals() {
        let store = MemoryParameterStore::new();
        store.put("/acm/a.example.com", "arn:aws:acm:1");
        assert_parameter_equals(&store, "/acm/a.example.com", "arn:aws:acm:1")
            .await
            .unwrap();
        let err = assert_parameter_equals(&store, "/acm/a.example.com", "other")
            .await
            .unwrap_err();
        assert!(err.is_assertion());
        let err = assert_parameter_equals(&store, "/acm/missing", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Backend(_)));
    }
}
