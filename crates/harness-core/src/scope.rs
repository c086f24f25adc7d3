//! Release scopes: handles registered for destruction when a scope ends.
//!
//! A handle is registered right after reservation and before the backend
//! apply, so cleanup covers partially failed deploys too.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;
use uuid::Uuid;

use crate::error::HarnessError;
use crate::executor::{DeploymentHandle, LifecycleExecutor};

#[derive(Debug)]
pub struct ReleaseScope {
    label: String,
    handles: Mutex<Vec<DeploymentHandle>>,
}

impl ReleaseScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeploymentHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `handle` for release.
    pub fn register(&self, handle: DeploymentHandle) {
        self.lock().push(handle);
    }

    /// Drop a handle that was destroyed explicitly.
    pub fn forget(&self, id: Uuid) {
        self.lock().retain(|h| h.id() != id);
    }

    /// Handles still queued, in registration order.
    pub fn pending(&self) -> Vec<DeploymentHandle> {
        self.lock().clone()
    }

    /// Destroy every queued handle in reverse registration order.
    ///
    /// Best-effort: every handle is attempted and every failure returned.
    /// With `skip`, the handles are left deployed and only logged.
    pub async fn release(&self, executor: &LifecycleExecutor, skip: bool) -> Vec<HarnessError> {
        let mut handles = std::mem::take(&mut *self.lock());
        if handles.is_empty() {
            return Vec::new();
        }
        if skip {
            for handle in &handles {
                info!(scope = %self.label, component = %handle.identity(), "destroy skipped, leaving deployed");
            }
            return Vec::new();
        }
        handles.reverse();
        executor.destroy_all(&handles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ComponentDescriptor;
    use infra_harness_backend::fakes::{MemoryBackend, Operation};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_runs_in_reverse_order() {
        let backend = Arc::new(MemoryBackend::new());
        let executor = LifecycleExecutor::new(backend.clone());
        let scope = ReleaseScope::new("case");
        for name in ["a", "b", "c"] {
            let handle = executor.reserve(&ComponentDescriptor::new(name, "s")).unwrap();
            scope.register(handle.clone());
            executor.apply(&handle).await.unwrap();
        }

        assert!(scope.release(&executor, false).await.is_empty());
        let destroyed: Vec<String> = backend
            .calls_for(Operation::Destroy)
            .into_iter()
            .map(|c| c.component)
            .collect();
        assert_eq!(destroyed, vec!["c", "b", "a"]);
        assert!(scope.pending().is_empty());
        assert_eq!(executor.live_count(), 0);
    }

    #[tokio::test]
    async fn test_forgotten_handle_is_not_released() {
        let backend = Arc::new(MemoryBackend::new());
        let executor = LifecycleExecutor::new(backend.clone());
        let scope = ReleaseScope::new("case");
        let handle = executor.deploy(&ComponentDescriptor::new("a", "s")).await.unwrap();
        scope.register(handle.clone());
        scope.forget(handle.id());

        scope.release(&executor, false).await;
        assert!(backend.calls_for(Operation::Destroy).is_empty());
    }

    #[tokio::test]
    async fn test_skip_leaves_resources_deployed() {
        let backend = Arc::new(MemoryBackend::new());
        let executor = LifecycleExecutor::new(backend.clone());
        let scope = ReleaseScope::new("dependencies");
        let handle = executor.deploy(&ComponentDescriptor::new("a", "s")).await.unwrap();
        scope.register(handle.clone());

        assert!(scope.release(&executor, true).await.is_empty());
        assert!(backend.is_deployed(&handle.identity()));
    }
}
