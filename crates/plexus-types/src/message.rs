//! Bus message envelopes.
//!
//! A [`Message`] is exactly one of a [`Command`] (point-to-point request,
//! optionally awaiting a [`Response`]) or an [`Event`] (fire-and-forget
//! notification). Payloads are flexible JSON maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::id::ModuleId;

/// Message payload: parameter name -> JSON value.
pub type Params = serde_json::Map<String, Value>;

/// A command sent to one module (or broadcast to all of them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// UUIDv7 message id, used for log correlation.
    pub id: Uuid,
    /// Command name, resolved against the recipient's command registry.
    pub name: String,
    #[serde(default)]
    pub params: Params,
    /// Recipient. `None` broadcasts to every subscriber except the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ModuleId>,
    pub sender: ModuleId,
    /// Set by the bus when the command was delivered as part of a broadcast.
    #[serde(default)]
    pub broadcast: bool,
    pub timestamp: DateTime<Utc>,
}

impl Command {
    /// Build a command with no recipient and no parameters.
    pub fn new(name: impl Into<String>, sender: impl Into<ModuleId>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            params: Params::new(),
            to: None,
            sender: sender.into(),
            broadcast: false,
            timestamp: Utc::now(),
        }
    }

    /// Build a command addressed to every subscribed module.
    pub fn broadcast(name: impl Into<String>, sender: impl Into<ModuleId>) -> Self {
        Self {
            broadcast: true,
            ..Self::new(name, sender)
        }
    }

    pub fn to(mut self, recipient: impl Into<ModuleId>) -> Self {
        self.to = Some(recipient.into());
        self.broadcast = false;
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set a single parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// A fire-and-forget notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// UUIDv7 message id, used for log correlation.
    pub id: Uuid,
    /// Event name (e.g. `"network.status.up"`).
    pub name: String,
    #[serde(default)]
    pub params: Params,
    /// Point recipient. `None` broadcasts to every subscriber except the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ModuleId>,
    /// Device the event relates to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub sender: ModuleId,
    /// Whether the event was emitted while the host was still starting.
    #[serde(default)]
    pub startup: bool,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, sender: impl Into<ModuleId>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            params: Params::new(),
            to: None,
            device_id: None,
            sender: sender.into(),
            startup: false,
            timestamp: Utc::now(),
        }
    }

    pub fn to(mut self, recipient: impl Into<ModuleId>) -> Self {
        self.to = Some(recipient.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn startup(mut self, startup: bool) -> Self {
        self.startup = startup;
        self
    }
}

/// A bus message: a command or an event, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Command(Command),
    Event(Event),
}

impl Message {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Command(c) => c.id,
            Self::Event(e) => e.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Command(c) => &c.name,
            Self::Event(e) => &e.name,
        }
    }

    pub fn sender(&self) -> &ModuleId {
        match self {
            Self::Command(c) => &c.sender,
            Self::Event(e) => &e.sender,
        }
    }

    pub fn to(&self) -> Option<&ModuleId> {
        match self {
            Self::Command(c) => c.to.as_ref(),
            Self::Event(e) => e.to.as_ref(),
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Self::Command(_))
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    /// Mark a command copy as delivered through a broadcast. No-op for events.
    pub(crate) fn set_broadcast(&mut self) {
        if let Self::Command(c) = self {
            c.broadcast = true;
        }
    }

    /// Copy of this message flagged as a broadcast delivery.
    pub fn as_broadcast(&self) -> Self {
        let mut copy = self.clone();
        copy.set_broadcast();
        copy
    }
}

impl From<Command> for Message {
    fn from(value: Command) -> Self {
        Self::Command(value)
    }
}

impl From<Event> for Message {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}

/// Reply to a command.
///
/// `error == false` with a non-empty `message` is an informational reply
/// (the command did not produce data but nothing went wrong).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl Response {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            error: false,
            message: String::new(),
            data: data.into(),
        }
    }

    /// A user-facing failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// A non-error reply carrying only a message.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            error: false,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
