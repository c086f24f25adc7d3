//! Trait contract tests for ProvisioningBackend and ParameterStore.
//!
//! These tests verify the behavioral contracts of the backend traits
//! using in-memory fakes. Any conforming implementation must pass these.

use infra_harness_backend::fakes::{MemoryBackend, MemoryParameterStore, Operation};
use infra_harness_backend::{
    BackendError, ComponentRef, Inputs, OutputMap, ParameterStore, ProvisioningBackend,
};
use serde_json::json;

fn inputs(value: serde_json::Value) -> Inputs {
    value.as_object().cloned().expect("object literal")
}

// ===========================================================================
// ProvisioningBackend contract tests
// ===========================================================================

#[tokio::test]
async fn deploy_then_outputs_echo_inputs() {
    let backend = MemoryBackend::new();
    let c = ComponentRef::new("dns-delegated", "default-test");
    backend
        .deploy(&c, &inputs(json!({ "x": 1, "zone": "example.com" })))
        .await
        .unwrap();

    let outputs = backend.outputs(&c).await.unwrap();
    assert_eq!(outputs["x"], json!(1));
    assert_eq!(outputs["zone"], json!("example.com"));
}

#[tokio::test]
async fn scripted_outputs_are_merged_over_inputs() {
    let mut scripted = OutputMap::new();
    scripted.insert("arn".to_string(), json!("arn:aws:acm:1"));
    let backend = MemoryBackend::new().with_outputs("acm", scripted);
    let c = ComponentRef::new("acm", "default-test");

    backend
        .deploy(&c, &inputs(json!({ "domain_name": "a.example.com" })))
        .await
        .unwrap();

    let outputs = backend.outputs(&c).await.unwrap();
    assert_eq!(outputs["arn"], json!("arn:aws:acm:1"));
    assert_eq!(outputs["domain_name"], json!("a.example.com"));
}

#[tokio::test]
async fn disabled_component_has_no_outputs() {
    let backend = MemoryBackend::new();
    let c = ComponentRef::new("acm/disabled", "default-test");
    backend
        .deploy(&c, &inputs(json!({ "enabled": false, "domain_name": "x" })))
        .await
        .unwrap();

    assert!(backend.outputs(&c).await.unwrap().is_empty());
}

#[tokio::test]
async fn outputs_of_unknown_component_fail() {
    let backend = MemoryBackend::new();
    let err = backend
        .outputs(&ComponentRef::new("nope", "default-test"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ComponentNotFound(_)));
}

#[tokio::test]
async fn failed_deploy_leaves_partial_state_that_destroy_clears() {
    let backend = MemoryBackend::new();
    let c = ComponentRef::new("acm", "default-test");
    backend.fail_on(Operation::Deploy, "acm", "Error: rate exceeded");

    let err = backend.deploy(&c, &Inputs::new()).await.unwrap_err();
    assert_eq!(err.diagnostics(), "Error: rate exceeded");
    assert!(backend.is_deployed(&c));

    backend.destroy(&c, &Inputs::new()).await.unwrap();
    assert!(!backend.is_deployed(&c));
}

#[tokio::test]
async fn destroy_of_absent_component_is_noop() {
    let backend = MemoryBackend::new();
    backend
        .destroy(&ComponentRef::new("ghost", "default-test"), &Inputs::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn plan_is_empty_for_unchanged_component() {
    let backend = MemoryBackend::new();
    let c = ComponentRef::new("acm", "default-test");
    let vars = inputs(json!({ "enabled": true }));
    backend.deploy(&c, &vars).await.unwrap();

    let plan = backend.plan(&c, &vars).await.unwrap();
    assert!(!plan.has_changes);
}

#[tokio::test]
async fn plan_reports_changed_inputs_and_injected_drift() {
    let backend = MemoryBackend::new();
    let c = ComponentRef::new("acm", "default-test");
    backend
        .deploy(&c, &inputs(json!({ "validation_method": "DNS" })))
        .await
        .unwrap();

    let plan = backend
        .plan(&c, &inputs(json!({ "validation_method": "EMAIL" })))
        .await
        .unwrap();
    assert!(plan.has_changes);
    assert!(plan.diff.contains("validation_method"));

    backend.inject_drift(&c, "tags.Owner changed").unwrap();
    let plan = backend
        .plan(&c, &inputs(json!({ "validation_method": "DNS" })))
        .await
        .unwrap();
    assert!(plan.has_changes);
    assert!(plan.diff.contains("tags.Owner"));
}

#[tokio::test]
async fn plan_never_changes_state() {
    let backend = MemoryBackend::new();
    let c = ComponentRef::new("acm", "default-test");
    backend.plan(&c, &Inputs::new()).await.unwrap();
    assert!(!backend.is_deployed(&c));
}

#[tokio::test]
async fn calls_are_recorded_in_order() {
    let backend = MemoryBackend::new();
    let a = ComponentRef::new("a", "s");
    let b = ComponentRef::new("b", "s");
    backend.deploy(&a, &Inputs::new()).await.unwrap();
    backend.deploy(&b, &Inputs::new()).await.unwrap();
    backend.destroy(&b, &Inputs::new()).await.unwrap();

    assert_eq!(backend.calls_for(Operation::Deploy), vec![a, b.clone()]);
    assert_eq!(backend.calls_for(Operation::Destroy), vec![b]);
    assert_eq!(backend.calls().len(), 3);
}

// ===========================================================================
// ParameterStore contract tests
// ===========================================================================

#[tokio::test]
async fn parameter_round_trip() {
    let store = MemoryParameterStore::new();
    store.put("/acm/a.example.com", "arn:aws:acm:1");
    assert_eq!(
        store.get_parameter("/acm/a.example.com").await.unwrap(),
        "arn:aws:acm:1"
    );
}

#[tokio::test]
async fn missing_parameter_is_not_found() {
    let store = MemoryParameterStore::new();
    let err = store.get_parameter("/acm/missing").await.unwrap_err();
    assert!(matches!(err, BackendError::ParameterNotFound(_)));
}
