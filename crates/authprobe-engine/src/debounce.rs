//! Single-slot debounced call
//!
//! Holds at most one pending delayed task. Scheduling again before the
//! delay elapses cancels the previous task, so near-simultaneous triggers
//! collapse onto one execution. Reset paths cancel outright.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Default)]
pub struct DebouncedCall {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `fut` to run after `delay`, cancelling any pending run.
    pub fn schedule<F>(&self, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });

        let mut pending = self.pending.lock().expect("debounce lock poisoned");
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending run, if any.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().expect("debounce lock poisoned");
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .expect("debounce lock poisoned")
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for DebouncedCall {
    fn drop(&mut self) {
        self.cancel();
    }
}
