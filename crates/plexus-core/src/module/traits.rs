//! The module contract and its type-erased wrapper.
//!
//! Async traits cannot be trait objects, so dispatch goes through three layers:
//! 1. `Module` uses native async fn in traits (RPITIT)
//! 2. `ModuleDyn` is the object-safe mirror with boxed futures, blanket-implemented
//! 3. `BoxModule` wraps `Arc<dyn ModuleDyn>` and delegates

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use plexus_types::Event;
use serde_json::Value;

use super::command::{CommandArgs, CommandError, CommandSpec};
use super::context::ModuleContext;

/// A unit of functionality hosted by the kernel.
///
/// Hooks take `&self`: a module may call its own commands from inside a
/// handler, so mutable state lives behind interior mutability.
pub trait Module: Send + Sync + 'static {
    /// Commands this module answers. Validated once before the module runs.
    fn command_specs(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// First hook, run before the core barrier.
    fn configure(&self, _ctx: &ModuleContext) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Run once every core module is configured.
    fn on_start(&self, _ctx: &ModuleContext) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Per-tick hook, called before every mailbox pull. Must not block.
    fn custom_process(
        &self,
        _ctx: &ModuleContext,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    /// An event sent by another module.
    fn on_event(
        &self,
        _event: &Event,
        _ctx: &ModuleContext,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Execute a declared command. Arguments are already validated.
    fn handle_command(
        &self,
        name: &str,
        args: CommandArgs,
        ctx: &ModuleContext,
    ) -> impl Future<Output = Result<Value, CommandError>> + Send;

    /// Run once while stopping, before the mailbox is removed.
    fn on_stop(&self, _ctx: &ModuleContext) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe version of [`Module`] with boxed futures.
pub trait ModuleDyn: Send + Sync {
    fn command_specs(&self) -> Vec<CommandSpec>;

    fn configure_boxed<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, anyhow::Result<()>>;

    fn on_start_boxed<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, anyhow::Result<()>>;

    fn custom_process_boxed<'a>(
        &'a self,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    fn on_event_boxed<'a>(
        &'a self,
        event: &'a Event,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    fn handle_command_boxed<'a>(
        &'a self,
        name: &'a str,
        args: CommandArgs,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, Result<Value, CommandError>>;

    fn on_stop_boxed<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, anyhow::Result<()>>;
}

impl<T: Module> ModuleDyn for T {
    fn command_specs(&self) -> Vec<CommandSpec> {
        Module::command_specs(self)
    }

    fn configure_boxed<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.configure(ctx))
    }

    fn on_start_boxed<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.on_start(ctx))
    }

    fn custom_process_boxed<'a>(
        &'a self,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.custom_process(ctx))
    }

    fn on_event_boxed<'a>(
        &'a self,
        event: &'a Event,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.on_event(event, ctx))
    }

    fn handle_command_boxed<'a>(
        &'a self,
        name: &'a str,
        args: CommandArgs,
        ctx: &'a ModuleContext,
    ) -> BoxFuture<'a, Result<Value, CommandError>> {
        Box::pin(self.handle_command(name, args, ctx))
    }

    fn on_stop_boxed<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.on_stop(ctx))
    }
}

/// Type-erased module, as produced by the catalog factories.
#[derive(Clone)]
pub struct BoxModule {
    inner: Arc<dyn ModuleDyn>,
}

impl BoxModule {
    pub fn new<T: Module>(module: T) -> Self {
        Self {
            inner: Arc::new(module),
        }
    }

    pub fn command_specs(&self) -> Vec<CommandSpec> {
        self.inner.command_specs()
    }

    pub async fn configure(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.inner.configure_boxed(ctx).await
    }

    pub async fn on_start(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.inner.on_start_boxed(ctx).await
    }

    pub async fn custom_process(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.inner.custom_process_boxed(ctx).await
    }

    pub async fn on_event(&self, event: &Event, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.inner.on_event_boxed(event, ctx).await
    }

    pub async fn handle_command(
        &self,
        name: &str,
        args: CommandArgs,
        ctx: &ModuleContext,
    ) -> Result<Value, CommandError> {
        self.inner.handle_command_boxed(name, args, ctx).await
    }

    pub async fn on_stop(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.inner.on_stop_boxed(ctx).await
    }
}

impl std::fmt::Debug for BoxModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxModule").finish_non_exhaustive()
    }
}
