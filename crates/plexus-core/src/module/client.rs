//! Per-module actor runtime.
//!
//! A `ModuleClient` owns one module instance and drives it through its
//! lifecycle on a dedicated tokio task:
//!
//! `Starting -> Configuring -> Configured -> AwaitingCoreBarrier -> Running -> Stopping -> Stopped`
//!
//! Configuration failures are reported and never block the barrier. While
//! running, the actor calls `custom_process`, pulls its mailbox and
//! dispatches. A fault escaping dispatch is reported and ends the actor.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use plexus_types::{BusError, ModuleId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::bootstrap::Bootstrap;
use super::command::RegistryError;
use super::context::ModuleContext;
use super::dispatch::{Dispatcher, panic_message};
use super::traits::BoxModule;
use crate::lifecycle::{JoinGuard, Latch};

/// Shortest mailbox wait per loop tick, so a zero setting cannot spin.
const MIN_PULL_TIMEOUT: Duration = Duration::from_millis(10);

/// Lifecycle state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActorState {
    Starting,
    Configuring,
    Configured,
    AwaitingCoreBarrier,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::AwaitingCoreBarrier => "awaiting_core_barrier",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One module wrapped for execution, not started yet.
pub struct ModuleClient {
    id: ModuleId,
    dispatcher: Arc<Dispatcher>,
    context: ModuleContext,
    bootstrap: Bootstrap,
    state: watch::Sender<ActorState>,
    stop: CancellationToken,
}

impl ModuleClient {
    /// Validate the module's commands and bind its context.
    pub fn new(id: ModuleId, module: BoxModule, bootstrap: Bootstrap) -> Result<Self, RegistryError> {
        let dispatcher = Arc::new(Dispatcher::new(id.clone(), module)?);
        let context = ModuleContext::new(
            id.clone(),
            Arc::clone(&bootstrap.shared.bus),
            bootstrap.shared.services.clone(),
        );
        context.attach(&dispatcher);
        let (state, _) = watch::channel(ActorState::Starting);
        Ok(Self {
            id,
            dispatcher,
            context,
            bootstrap,
            state,
            stop: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn context(&self) -> &ModuleContext {
        &self.context
    }

    /// Latch set once this module's configuration step ends.
    pub fn join_latch(&self) -> Latch {
        self.bootstrap.join.clone()
    }

    /// Start the actor task.
    pub fn spawn(self) -> ModuleHandle {
        let span = info_span!("module_actor", module = %self.id);
        let handle = ModuleHandle {
            id: self.id.clone(),
            state: self.state.subscribe(),
            stop: self.stop.clone(),
            join: self.bootstrap.join.clone(),
            task: None,
        };
        let task = tokio::spawn(self.run().instrument(span));
        ModuleHandle {
            task: Some(task),
            ..handle
        }
    }

    async fn run(self) {
        let Self {
            id,
            dispatcher,
            context: ctx,
            bootstrap,
            state,
            stop,
        } = self;
        let module = dispatcher.module();
        let runtime = &bootstrap.shared.runtime;

        {
            let _join = JoinGuard::new(bootstrap.join.clone());
            state.send_replace(ActorState::Configuring);
            guarded(&ctx, "configure", module.configure(&ctx)).await;
            state.send_replace(ActorState::Configured);
        }

        state.send_replace(ActorState::AwaitingCoreBarrier);
        tokio::select! {
            released = bootstrap.shared.core_sync.wait_timeout(runtime.core_barrier_timeout()) => {
                if !released {
                    warn!("core barrier not released in time, starting anyway");
                }
            }
            () = stop.cancelled() => {}
        }

        if !stop.is_cancelled() {
            state.send_replace(ActorState::Running);
            info!("module running");
            guarded(&ctx, "on_start", module.on_start(&ctx)).await;
            let pull_timeout = runtime.pull_timeout().max(MIN_PULL_TIMEOUT);
            main_loop(&id, &dispatcher, &ctx, &stop, pull_timeout).await;
        }

        state.send_replace(ActorState::Stopping);
        guarded(&ctx, "on_stop", module.on_stop(&ctx)).await;
        if let Err(err) = ctx.bus().remove_subscription(&id) {
            debug!(error = %err, "mailbox already removed");
        }
        state.send_replace(ActorState::Stopped);
        info!("module stopped");
    }
}

impl fmt::Debug for ModuleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleClient")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

async fn main_loop(
    id: &ModuleId,
    dispatcher: &Dispatcher,
    ctx: &ModuleContext,
    stop: &CancellationToken,
    pull_timeout: Duration,
) {
    let bus = ctx.bus();
    loop {
        if stop.is_cancelled() {
            break;
        }
        guarded(ctx, "custom_process", dispatcher.module().custom_process(ctx)).await;

        let pulled = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            pulled = bus.pull(id, pull_timeout) => pulled,
        };
        let entry = match pulled {
            Ok(entry) => entry,
            Err(BusError::NoMessageAvailable { .. }) => continue,
            Err(err) => {
                warn!(error = %err, "mailbox unavailable, stopping actor");
                ctx.report_exception("pull", &err);
                break;
            }
        };

        let name = entry.message.name().to_string();
        if let Err(panic) = AssertUnwindSafe(dispatcher.dispatch(entry, ctx))
            .catch_unwind()
            .await
        {
            let reason = panic_message(panic.as_ref());
            warn!(message = %name, %reason, "dispatch failed, stopping actor");
            ctx.report_exception("dispatch", &reason);
            break;
        }
    }
}

/// Run a lifecycle hook, reporting failures and panics instead of propagating them.
async fn guarded(
    ctx: &ModuleContext,
    stage: &str,
    hook: impl Future<Output = anyhow::Result<()>>,
) {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(stage, error = %format!("{err:#}"), "module hook failed");
            ctx.report_exception(stage, format!("{err:#}"));
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            warn!(stage, %reason, "module hook panicked");
            ctx.report_exception(stage, reason);
        }
    }
}

/// Control handle of a running actor.
#[derive(Debug)]
pub struct ModuleHandle {
    id: ModuleId,
    state: watch::Receiver<ActorState>,
    stop: CancellationToken,
    join: Latch,
    task: Option<JoinHandle<()>>,
}

impl ModuleHandle {
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn state(&self) -> ActorState {
        *self.state.borrow()
    }

    /// Wait until the actor reaches `target` (or any later state).
    pub async fn wait_for(&self, target: ActorState) -> ActorState {
        let mut rx = self.state.clone();
        match rx.wait_for(|state| *state >= target).await {
            Ok(state) => *state,
            // The actor dropped its sender: it is gone.
            Err(_) => ActorState::Stopped,
        }
    }

    pub fn join_latch(&self) -> &Latch {
        &self.join
    }

    /// Ask the actor to stop. The message being handled, if any, completes first.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the task to end, aborting it on expiry.
    ///
    /// Returns whether the actor finished on its own.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(mut task) = self.task.take() else {
            return true;
        };
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(module = %self.id, error = %err, "actor task ended abnormally");
                true
            }
            Err(_) => {
                warn!(module = %self.id, ?timeout, "actor did not stop in time, aborting");
                task.abort();
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
