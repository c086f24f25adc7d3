//! Lifecycle executor: deploy and destroy of single components.
//!
//! The executor owns the live-handle registry. A handle is registered by
//! [`LifecycleExecutor::reserve`] before any backend call, so a deploy that
//! fails half-way (or is cancelled by a timeout) is still reachable through
//! [`LifecycleExecutor::live_handle`] and gets destroyed during cleanup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use infra_harness_backend::ProvisioningBackend;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::descriptor::{ComponentDescriptor, ComponentRef};
use crate::error::{HarnessError, Result};
use crate::obs;

/// Proof of a reservation for one `(component, stack)`.
///
/// Carries a snapshot of the descriptor: later changes to the caller's
/// descriptor do not affect what gets destroyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentHandle {
    id: Uuid,
    descriptor: ComponentDescriptor,
    digest: String,
    reserved_at: DateTime<Utc>,
}

impl DeploymentHandle {
    fn new(descriptor: ComponentDescriptor) -> Self {
        let digest = descriptor.digest();
        Self {
            id: Uuid::new_v4(),
            descriptor,
            digest,
            reserved_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub fn identity(&self) -> ComponentRef {
        self.descriptor.identity()
    }

    pub fn component(&self) -> &str {
        &self.descriptor.component
    }

    pub fn stack(&self) -> &str {
        &self.descriptor.stack
    }

    /// SHA-256 of the descriptor at reservation time.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }
}

/// Where a live handle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Identity claimed, backend not called yet.
    Reserved,
    /// Backend deploy succeeded.
    Applied,
    /// Backend deploy failed or timed out; resources may be partial.
    Failed,
}

#[derive(Debug)]
struct LiveEntry {
    handle: DeploymentHandle,
    state: HandleState,
    seq: u64,
}

/// Deploys and destroys components against a [`ProvisioningBackend`].
pub struct LifecycleExecutor {
    backend: Arc<dyn ProvisioningBackend>,
    timeout: Option<Duration>,
    live: Mutex<HashMap<ComponentRef, LiveEntry>>,
    next_seq: AtomicU64,
}

impl LifecycleExecutor {
    /// Create an executor without an operation timeout.
    pub fn new(backend: Arc<dyn ProvisioningBackend>) -> Self {
        Self {
            backend,
            timeout: None,
            live: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Bound every backend call; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ProvisioningBackend> {
        &self.backend
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ComponentRef, LiveEntry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `(component, stack)` and register the handle as live.
    ///
    /// Fails with [`HarnessError::AlreadyDeployed`] if the identity is live.
    pub fn reserve(&self, descriptor: &ComponentDescriptor) -> Result<DeploymentHandle> {
        let key = descriptor.identity();
        let mut live = self.lock();
        if live.contains_key(&key) {
            return Err(HarnessError::AlreadyDeployed {
                component: key.component,
                stack: key.stack,
            });
        }
        let handle = DeploymentHandle::new(descriptor.clone());
        live.insert(
            key,
            LiveEntry {
                handle: handle.clone(),
                state: HandleState::Reserved,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(handle)
    }

    /// Run the backend deploy for a reserved handle.
    ///
    /// Backend failures become [`HarnessError::DeployFailed`] with the
    /// backend's diagnostics verbatim. The handle stays live either way.
    pub async fn apply(&self, handle: &DeploymentHandle) -> Result<()> {
        let key = handle.identity();
        match self.state_of(handle) {
            None => {
                return Err(HarnessError::NotDeployed {
                    component: key.component,
                    stack: key.stack,
                })
            }
            Some(HandleState::Applied) => {
                return Err(HarnessError::AlreadyDeployed {
                    component: key.component,
                    stack: key.stack,
                })
            }
            Some(_) => {}
        }

        let start = Instant::now();
        let result = self
            .bounded("deploy", &key, async {
                self.backend
                    .deploy(&key, &handle.descriptor.inputs)
                    .await
                    .map_err(HarnessError::from)
            })
            .await;

        match result {
            Ok(()) => {
                self.set_state(handle, HandleState::Applied);
                obs::emit_component_deployed(
                    &key.component,
                    &key.stack,
                    start.elapsed().as_millis() as u64,
                );
                Ok(())
            }
            Err(err) => {
                self.set_state(handle, HandleState::Failed);
                let err = match err {
                    HarnessError::Backend(e) => HarnessError::DeployFailed {
                        component: key.component.clone(),
                        stack: key.stack.clone(),
                        diagnostics: e.diagnostics(),
                    },
                    other => other,
                };
                obs::emit_component_deploy_failed(&key.component, &key.stack, &err);
                Err(err)
            }
        }
    }

    /// Reserve and apply in one step.
    ///
    /// On apply failure the handle is still live; use
    /// [`live_handle`](Self::live_handle) to clean it up.
    pub async fn deploy(&self, descriptor: &ComponentDescriptor) -> Result<DeploymentHandle> {
        let handle = self.reserve(descriptor)?;
        self.apply(&handle).await?;
        Ok(handle)
    }

    /// Mark a reserved handle as applied without calling the backend.
    ///
    /// Used to attach to components deployed by an earlier run.
    pub fn adopt(&self, handle: &DeploymentHandle) -> Result<()> {
        match self.state_of(handle) {
            Some(_) => {
                self.set_state(handle, HandleState::Applied);
                debug!(component = %handle.identity(), "adopted existing deployment");
                Ok(())
            }
            None => Err(HarnessError::NotDeployed {
                component: handle.component().to_string(),
                stack: handle.stack().to_string(),
            }),
        }
    }

    /// Tear a component down.
    ///
    /// A handle that is no longer live is a no-op. On failure the handle
    /// stays live so the destroy can be retried.
    pub async fn destroy(&self, handle: &DeploymentHandle) -> Result<()> {
        let key = handle.identity();
        if self.state_of(handle).is_none() {
            debug!(component = %key, "destroy of non-live handle ignored");
            return Ok(());
        }

        let start = Instant::now();
        let result = self
            .bounded("destroy", &key, async {
                self.backend
                    .destroy(&key, &handle.descriptor.inputs)
                    .await
                    .map_err(HarnessError::from)
            })
            .await;

        match result {
            Ok(()) => {
                let mut live = self.lock();
                if live.get(&key).is_some_and(|e| e.handle.id == handle.id) {
                    live.remove(&key);
                }
                drop(live);
                obs::emit_component_destroyed(
                    &key.component,
                    &key.stack,
                    start.elapsed().as_millis() as u64,
                );
                Ok(())
            }
            Err(err) => {
                let reason = match &err {
                    HarnessError::Backend(e) => e.diagnostics(),
                    other => other.to_string(),
                };
                Err(HarnessError::DestroyFailed {
                    component: key.component,
                    stack: key.stack,
                    reason,
                })
            }
        }
    }

    /// Destroy `handles` in the given order, continuing past failures.
    pub async fn destroy_all(&self, handles: &[DeploymentHandle]) -> Vec<HarnessError> {
        let mut errors = Vec::new();
        for handle in handles {
            if let Err(err) = self.destroy(handle).await {
                obs::emit_cleanup_error(handle.component(), &err);
                errors.push(err);
            }
        }
        errors
    }

    /// The live handle for `(component, stack)`, if any.
    pub fn live_handle(&self, component: &str, stack: &str) -> Option<DeploymentHandle> {
        self.lock()
            .get(&ComponentRef::new(component, stack))
            .map(|e| e.handle.clone())
    }

    /// All live handles, most recently reserved first.
    pub fn live_handles(&self) -> Vec<DeploymentHandle> {
        let live = self.lock();
        let mut entries: Vec<&LiveEntry> = live.values().collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.into_iter().map(|e| e.handle.clone()).collect()
    }

    /// State of `handle`, or `None` if it is not the live handle for its identity.
    pub fn state_of(&self, handle: &DeploymentHandle) -> Option<HandleState> {
        self.lock()
            .get(&handle.identity())
            .filter(|e| e.handle.id == handle.id)
            .map(|e| e.state)
    }

    pub fn is_applied(&self, handle: &DeploymentHandle) -> bool {
        self.state_of(handle) == Some(HandleState::Applied)
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Fail with [`HarnessError::NotDeployed`] unless `handle` is live and applied.
    pub fn ensure_applied(&self, handle: &DeploymentHandle) -> Result<()> {
        if self.is_applied(handle) {
            Ok(())
        } else {
            Err(HarnessError::NotDeployed {
                component: handle.component().to_string(),
                stack: handle.stack().to_string(),
            })
        }
    }

    fn set_state(&self, handle: &DeploymentHandle, state: HandleState) {
        if let Some(entry) = self
            .lock()
            .get_mut(&handle.identity())
            .filter(|e| e.handle.id == handle.id)
        {
            entry.state = state;
        }
    }

    /// Run `fut` under the configured operation timeout.
    pub(crate) async fn bounded<T, F>(
        &self,
        operation: &str,
        component: &ComponentRef,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            None => fut.await,
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(HarnessError::Timeout {
                    operation: operation.to_string(),
                    component: component.to_string(),
                    seconds: limit.as_secs_f64(),
                }),
            },
        }
    }
}

impl std::fmt::Debug for LifecycleExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleExecutor")
            .field("timeout", &self.timeout)
            .field("live", &self.live_count())
            .finish()
    }
}
