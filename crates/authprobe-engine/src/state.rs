//! Shared flow state handle
//!
//! The engine's injected-updater seam: the state machine and the correlator
//! mutate `FlowState` only through `update`, and every mutation publishes a
//! fresh snapshot to subscribers via a watch channel.

use std::sync::Arc;

use authprobe_core::FlowState;
use tokio::sync::{watch, RwLock};

/// Cloneable handle to one session's flow state.
#[derive(Clone)]
pub struct SharedFlowState {
    inner: Arc<RwLock<FlowState>>,
    tx: watch::Sender<FlowState>,
}

impl SharedFlowState {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::from_state(FlowState::new(server_url))
    }

    /// Wrap a pre-seeded state (e.g. pre-registered client credentials).
    pub fn from_state(state: FlowState) -> Self {
        let (tx, _) = watch::channel(state.clone());
        Self {
            inner: Arc::new(RwLock::new(state)),
            tx,
        }
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> FlowState {
        self.inner.read().await.clone()
    }

    /// Mutate the state and publish the result. Returns whatever the
    /// closure returns, so guard checks can be made atomically with their
    /// effect.
    pub async fn update<R>(&self, f: impl FnOnce(&mut FlowState) -> R) -> R {
        let mut guard = self.inner.write().await;
        let result = f(&mut guard);
        let _ = self.tx.send(guard.clone());
        result
    }

    /// Replace the state wholesale (reset / server switch).
    pub async fn replace(&self, state: FlowState) {
        let mut guard = self.inner.write().await;
        *guard = state;
        let _ = self.tx.send(guard.clone());
    }

    /// Subscribe to state snapshots for rendering.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.tx.subscribe()
    }
}
