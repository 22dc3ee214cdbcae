//! Routing of mailbox entries into module hooks.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use plexus_types::{Command, Event, Message, ModuleId, Response};
use tracing::{debug, trace, warn};

use super::command::{CommandError, CommandRegistry, RegistryError, UNKNOWN_COMMAND};
use super::context::ModuleContext;
use super::traits::BoxModule;
use crate::message::MailboxEntry;

/// Turns messages into calls on one module.
///
/// Handler faults never escape: failures become error responses and event
/// hook failures are logged.
#[derive(Debug)]
pub struct Dispatcher {
    id: ModuleId,
    module: BoxModule,
    registry: CommandRegistry,
}

impl Dispatcher {
    /// Validate the module's command declarations.
    pub fn new(id: ModuleId, module: BoxModule) -> Result<Self, RegistryError> {
        let registry = CommandRegistry::build(module.command_specs())?;
        Ok(Self {
            id,
            module,
            registry,
        })
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn module(&self) -> &BoxModule {
        &self.module
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Dispatch one mailbox entry, answering the waiting sender if any.
    pub async fn dispatch(&self, entry: MailboxEntry, ctx: &ModuleContext) {
        let (message, reply) = entry.into_parts();
        match message {
            Message::Command(command) => {
                let response = self.dispatch_command(&command, ctx).await;
                if let Some(reply) = reply {
                    if reply.send(response).is_err() {
                        debug!(module = %self.id, command = %command.name, "sender stopped waiting before reply");
                    }
                }
            }
            Message::Event(event) => self.dispatch_event(&event, ctx).await,
        }
    }

    /// Run a command handler and map its outcome to a response.
    pub async fn dispatch_command(&self, command: &Command, ctx: &ModuleContext) -> Response {
        let Some(spec) = self.registry.get(&command.name) else {
            // Broadcast commands reach every module; most do not answer them.
            if command.broadcast {
                trace!(module = %self.id, command = %command.name, "ignoring unknown broadcast command");
            } else {
                warn!(module = %self.id, command = %command.name, sender = %command.sender, "unknown command");
            }
            return Response::failure(UNKNOWN_COMMAND);
        };

        let args = match spec.bind(command) {
            Ok(args) => args,
            Err(err) => {
                debug!(module = %self.id, command = %command.name, error = %err, "rejected command arguments");
                return err.into_response();
            }
        };

        let call = self.module.handle_command(&command.name, args, ctx);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(data)) => Response::ok(data),
            Ok(Err(err)) => {
                if !matches!(err, CommandError::Info(_)) {
                    debug!(module = %self.id, command = %command.name, error = %err, "command failed");
                }
                err.into_response()
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(module = %self.id, command = %command.name, %reason, "command handler panicked");
                ctx.report_exception(&format!("command:{}", command.name), &reason);
                Response::failure(format!("command '{}' failed: {reason}", command.name))
            }
        }
    }

    /// Run the event hook. Events from this module itself are dropped.
    pub async fn dispatch_event(&self, event: &Event, ctx: &ModuleContext) {
        if event.sender == self.id {
            trace!(module = %self.id, event = %event.name, "dropping self-sent event");
            return;
        }
        match AssertUnwindSafe(self.module.on_event(event, ctx)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(module = %self.id, event = %event.name, error = %format!("{err:#}"), "event handler failed");
            }
            Err(panic) => {
                warn!(module = %self.id, event = %event.name, reason = %panic_message(panic.as_ref()), "event handler panicked");
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
