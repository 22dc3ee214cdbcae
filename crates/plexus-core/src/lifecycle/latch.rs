//! One-shot, multi-waiter signals used for the startup barrier.

use std::time::Duration;

use tokio::sync::watch;

/// A signal that is set once and stays set.
///
/// Used both as a module's join event (set when its configuration step ends)
/// and as the shared core barrier every actor waits on before `on_start`.
#[derive(Debug, Clone)]
pub struct Latch {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Set the latch, releasing every current and future waiter.
    pub fn set(&self) {
        self.tx.send_if_modified(|set| !std::mem::replace(set, true));
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Wait up to `timeout`. Returns whether the latch was set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok() || self.is_set()
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Sets its latch when dropped.
///
/// An actor holds one across its configuration step so the loader's barrier
/// is released even when the step fails or the task is torn down early.
#[derive(Debug)]
pub struct JoinGuard {
    latch: Latch,
}

impl JoinGuard {
    pub fn new(latch: Latch) -> Self {
        Self { latch }
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        self.latch.set();
    }
}
