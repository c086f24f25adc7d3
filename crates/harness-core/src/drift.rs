//! Drift verification: re-plan a deployed component and require no changes.

use infra_harness_backend::PlanResult;

use crate::descriptor::ComponentDescriptor;
use crate::error::{HarnessError, Result};
use crate::executor::LifecycleExecutor;
use crate::obs;

/// Read-only planner over the executor's backend. Never applies.
#[derive(Debug, Clone, Copy)]
pub struct DriftVerifier<'a> {
    executor: &'a LifecycleExecutor,
}

impl<'a> DriftVerifier<'a> {
    pub fn new(executor: &'a LifecycleExecutor) -> Self {
        Self { executor }
    }

    /// Plan `descriptor` against live state.
    pub async fn plan(&self, descriptor: &ComponentDescriptor) -> Result<PlanResult> {
        let key = descriptor.identity();
        self.executor
            .bounded("plan", &key, async {
                self.executor
                    .backend()
                    .plan(&key, &descriptor.inputs)
                    .await
                    .map_err(HarnessError::from)
            })
            .await
    }

    /// Fail with [`HarnessError::DriftDetected`] if planning `descriptor`
    /// would change anything.
    ///
    /// The descriptor's identity must have a live, applied handle.
    pub async fn assert_no_drift(&self, descriptor: &ComponentDescriptor) -> Result<()> {
        let applied = self
            .executor
            .live_handle(&descriptor.component, &descriptor.stack)
            .is_some_and(|h| self.executor.is_applied(&h));
        if !applied {
            return Err(HarnessError::NotDeployed {
                component: descriptor.component.clone(),
                stack: descriptor.stack.clone(),
            });
        }

        let plan = self.plan(descriptor).await?;
        obs::emit_drift_checked(&descriptor.component, &descriptor.stack, plan.has_changes);
        if plan.has_changes {
            return Err(HarnessError::DriftDetected {
                component: descriptor.component.clone(),
                stack: descriptor.stack.clone(),
                diff: plan.diff,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_harness_backend::fakes::{MemoryBackend, Operation};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fresh_deployment_has_no_drift() {
        let backend = Arc::new(MemoryBackend::new());
        let executor = LifecycleExecutor::new(backend.clone());
        let d = ComponentDescriptor::new("acm", "default-test").with_input("enabled", true);
        executor.deploy(&d).await.unwrap();

        DriftVerifier::new(&executor).assert_no_drift(&d).await.unwrap();
        assert_eq!(backend.calls_for(Operation::Plan).len(), 1);
        assert_eq!(backend.calls_for(Operation::Deploy).len(), 1);
    }

    #[tokio::test]
    async fn test_undeployed_component_is_rejected() {
        let executor = LifecycleExecutor::new(Arc::new(MemoryBackend::new()));
        let d = ComponentDescriptor::new("acm", "default-test");
        let err = DriftVerifier::new(&executor)
            .assert_no_drift(&d)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotDeployed { .. }));
    }

    #[tokio::test]
    async fn test_changed_inputs_count_as_drift() {
        let executor = LifecycleExecutor::new(Arc::new(MemoryBackend::new()));
        let d = ComponentDescriptor::new("acm", "default-test").with_input("validation_method", "DNS");
        executor.deploy(&d).await.unwrap();

        let changed = d.clone().with_input("validation_method", "EMAIL");
        let err = DriftVerifier::new(&executor)
            .assert_no_drift(&changed)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::DriftDetected { ref diff, .. } if diff.contains("validation_method")));
    }
}
