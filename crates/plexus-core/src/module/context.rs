//! A module's view of the kernel.
//!
//! `ModuleContext` is handed to every hook. It sends messages on the module's
//! behalf (stamping it as the sender), short-circuits commands a module sends
//! to itself, and exposes the collaborator ports.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use plexus_types::{BusError, Command, Event, ExecutionStep, Message, ModuleId, Params, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::dispatch::Dispatcher;
use crate::message::MessageBus;
use crate::services::{ResourceArbiter, ResourceCallback, Services};

/// Cheap-to-clone handle bound to one module id.
#[derive(Clone)]
pub struct ModuleContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ModuleId,
    bus: Arc<MessageBus>,
    services: Services,
    /// Set once the actor is built. Weak, since modules may keep a context.
    dispatcher: OnceLock<Weak<Dispatcher>>,
}

impl ModuleContext {
    pub fn new(id: impl Into<ModuleId>, bus: Arc<MessageBus>, services: Services) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: id.into(),
                bus,
                services,
                dispatcher: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn attach(&self, dispatcher: &Arc<Dispatcher>) {
        if self.inner.dispatcher.set(Arc::downgrade(dispatcher)).is_err() {
            debug!(module = %self.inner.id, "dispatcher already attached");
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.inner.id
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.inner.bus
    }

    pub fn phase(&self) -> ExecutionStep {
        self.inner.bus.phase().current()
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Push a raw message through the bus.
    ///
    /// A command addressed to this module runs its handler directly, without
    /// going through the mailbox: the actor is busy running the caller and
    /// could never dequeue it.
    pub async fn push(
        &self,
        message: impl Into<Message>,
        timeout: Duration,
    ) -> Result<Option<Response>, BusError> {
        match message.into() {
            Message::Command(command) if command.to.as_ref() == Some(self.id()) => {
                self.dispatch_to_self(command).await.map(Some)
            }
            message => self.inner.bus.push(message, timeout).await,
        }
    }

    /// Send a command to `to` and wait up to `timeout` for the reply.
    ///
    /// A command addressed to this module runs its handler directly, without
    /// going through the mailbox. A zero timeout does not wait and yields an
    /// empty response.
    pub async fn send_command(
        &self,
        to: impl Into<ModuleId>,
        name: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<Response, BusError> {
        let command = Command::new(name, self.id()).to(to).params(params);
        Ok(self.push(command, timeout).await?.unwrap_or_default())
    }

    /// Send a command without waiting for its outcome.
    pub async fn send_command_nowait(
        &self,
        to: impl Into<ModuleId>,
        name: &str,
        params: Params,
    ) -> Result<(), BusError> {
        self.send_command(to, name, params, Duration::ZERO)
            .await
            .map(|_| ())
    }

    /// Send a command to every other subscribed module.
    pub async fn broadcast_command(&self, name: &str, params: Params) -> Result<(), BusError> {
        let command = Command::broadcast(name, self.id()).params(params);
        self.push(command, Duration::ZERO).await.map(|_| ())
    }

    /// Broadcast an event to every other subscribed module.
    pub async fn send_event(&self, name: &str, params: Params) -> Result<(), BusError> {
        self.emit(Event::new(name, self.id()).params(params)).await
    }

    /// Send an event to a single module (or `"rpc"` for the UI clients).
    pub async fn send_event_to(
        &self,
        to: impl Into<ModuleId>,
        name: &str,
        params: Params,
    ) -> Result<(), BusError> {
        self.emit(Event::new(name, self.id()).to(to).params(params))
            .await
    }

    /// Send a prepared event, stamped with this module as sender.
    pub async fn emit(&self, mut event: Event) -> Result<(), BusError> {
        event.sender = self.id().clone();
        event.startup = self.inner.bus.phase().is_before_run();
        self.push(event, Duration::ZERO).await.map(|_| ())
    }

    async fn dispatch_to_self(&self, command: Command) -> Result<Response, BusError> {
        let dispatcher = self
            .inner
            .dispatcher
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| BusError::InvalidModule(self.id().clone()))?;
        debug!(module = %self.id(), command = %command.name, "dispatching command to self");
        Ok(dispatcher.dispatch_command(&command, self).await)
    }

    /// Load this module's persisted settings, if any.
    pub async fn settings<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        let Some(store) = &self.inner.services.settings else {
            return Ok(None);
        };
        store
            .load(self.id())
            .await?
            .map(|raw| serde_json::from_value(raw).context("malformed module settings"))
            .transpose()
    }

    pub async fn save_settings<T: Serialize>(&self, settings: &T) -> anyhow::Result<()> {
        let store = self
            .inner
            .services
            .settings
            .as_ref()
            .ok_or_else(|| anyhow!("no settings store configured"))?;
        let raw = serde_json::to_value(settings).context("settings are not serializable")?;
        store.save(self.id(), &raw).await
    }

    pub fn register_resource(
        &self,
        resource: &str,
        on_acquired: ResourceCallback,
        on_must_release: ResourceCallback,
        permanent: bool,
    ) -> anyhow::Result<()> {
        self.resources()?
            .register_resource(self.id(), resource, on_acquired, on_must_release, permanent)
    }

    pub fn acquire_resource(&self, resource: &str) -> anyhow::Result<bool> {
        self.resources()?.acquire_resource(self.id(), resource)
    }

    pub fn release_resource(&self, resource: &str) -> anyhow::Result<()> {
        self.resources()?.release_resource(self.id(), resource)
    }

    fn resources(&self) -> anyhow::Result<&Arc<dyn ResourceArbiter>> {
        self.inner
            .services
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("no resource arbiter configured"))
    }

    /// Forward a failure to the crash reporter.
    pub fn report_exception(&self, stage: &str, error: impl std::fmt::Display) {
        self.inner.services.report(self.id(), stage, error);
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}
