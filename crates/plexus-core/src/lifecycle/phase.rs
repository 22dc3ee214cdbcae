//! Monotonic execution phase shared by the bus, the actors and the loader.

use std::sync::Arc;

use plexus_types::ExecutionStep;
use tokio::sync::watch;
use tracing::info;

/// Shared handle to the current [`ExecutionStep`].
///
/// Cloning is cheap; every clone observes the same phase. The phase only
/// moves forward: attempts to go back (or stay) are ignored.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    tx: Arc<watch::Sender<ExecutionStep>>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ExecutionStep::Boot);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ExecutionStep {
        *self.tx.borrow()
    }

    /// Whether the host has not reached RUN yet.
    pub fn is_before_run(&self) -> bool {
        self.current().is_before_run()
    }

    /// Move to `step` if it is later than the current phase.
    ///
    /// Returns `true` when the phase changed.
    pub fn advance(&self, step: ExecutionStep) -> bool {
        let mut previous = None;
        let changed = self.tx.send_if_modified(|current| {
            if step > *current {
                previous = Some(*current);
                *current = step;
                true
            } else {
                false
            }
        });
        if let Some(from) = previous {
            info!(%from, to = %step, "execution phase advanced");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionStep> {
        self.tx.subscribe()
    }

    /// Wait until the phase reaches at least `step`.
    pub async fn wait_for(&self, step: ExecutionStep) {
        let mut rx = self.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|current| *current >= step).await;
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
