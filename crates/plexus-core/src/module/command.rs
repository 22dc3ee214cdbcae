//! Per-module command registry and argument binding.
//!
//! Each module declares its commands once, as [`CommandSpec`]s. The actor
//! validates them into a [`CommandRegistry`] before the module runs, and
//! binds every incoming [`Command`] against its spec: required parameters
//! must be present, and the reserved `command_sender` parameter is injected
//! from the message sender instead of being read from the payload.

use std::collections::{HashMap, HashSet};

use plexus_types::{BusError, Command, ModuleId, Params, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

/// Reserved parameter name carrying the id of the module that sent a command.
pub const COMMAND_SENDER: &str = "command_sender";

/// Response message for a command the module does not declare.
pub const UNKNOWN_COMMAND: &str = "command doesn't exist";

/// Errors a command handler returns. Each maps onto a [`Response`].
#[derive(Debug, Error)]
pub enum CommandError {
    /// User-facing failure: `{error: true, message}`.
    #[error("{0}")]
    Failure(String),

    /// Informational outcome, not an error: `{error: false, message}`.
    #[error("{0}")]
    Info(String),

    /// Required parameters absent from the payload.
    #[error("missing parameters")]
    MissingParameter(Vec<String>),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A bus call made by the handler failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl CommandError {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info(message.into())
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            Self::Info(_) => Response::info(message),
            Self::MissingParameter(missing) => Response {
                error: true,
                message,
                data: json!({ "missing": missing }),
            },
            _ => Response::failure(message),
        }
    }
}

/// Invalid command declarations, rejected when the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command name cannot be empty")]
    EmptyName,

    #[error("command '{0}' is declared twice")]
    DuplicateCommand(String),

    #[error("command '{command}' declares parameter '{parameter}' twice")]
    DuplicateParameter { command: String, parameter: String },

    #[error("command '{0}' declares the reserved parameter 'command_sender'")]
    ReservedParameter(String),
}

/// Declaration of one command a module answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    pub fn required(mut self, param: impl Into<String>) -> Self {
        self.required.push(param.into());
        self
    }

    pub fn optional(mut self, param: impl Into<String>) -> Self {
        self.optional.push(param.into());
        self
    }

    fn params(&self) -> impl Iterator<Item = &String> {
        self.required.iter().chain(&self.optional)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut seen = HashSet::new();
        for param in self.params() {
            if param == COMMAND_SENDER {
                return Err(RegistryError::ReservedParameter(self.name.clone()));
            }
            if !seen.insert(param.as_str()) {
                return Err(RegistryError::DuplicateParameter {
                    command: self.name.clone(),
                    parameter: param.clone(),
                });
            }
        }
        Ok(())
    }

    /// Build the handler arguments for `command`.
    ///
    /// Only declared parameters are kept. Missing required parameters fail
    /// with [`CommandError::MissingParameter`].
    pub fn bind(&self, command: &Command) -> Result<CommandArgs, CommandError> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| !command.params.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CommandError::MissingParameter(missing));
        }

        let params: Params = self
            .params()
            .filter_map(|name| {
                command
                    .params
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        Ok(CommandArgs {
            params,
            sender: command.sender.clone(),
        })
    }
}

/// Validated `name -> spec` table of one module.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    specs: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    pub fn build(specs: impl IntoIterator<Item = CommandSpec>) -> Result<Self, RegistryError> {
        let mut registry = HashMap::new();
        for spec in specs {
            spec.validate()?;
            if registry.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateCommand(spec.name));
            }
            registry.insert(spec.name.clone(), spec);
        }
        Ok(Self { specs: registry })
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Declared command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Arguments handed to a command handler.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    params: Params,
    sender: ModuleId,
}

impl CommandArgs {
    pub fn new(params: Params, sender: impl Into<ModuleId>) -> Self {
        Self {
            params,
            sender: sender.into(),
        }
    }

    /// The injected `command_sender`.
    pub fn sender(&self) -> &ModuleId {
        &self.sender
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Deserialize a required parameter.
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T, CommandError> {
        let raw = self
            .get(name)
            .ok_or_else(|| CommandError::MissingParameter(vec![name.to_string()]))?;
        serde_json::from_value(raw.clone()).map_err(|e| CommandError::invalid(name, e.to_string()))
    }

    /// Deserialize an optional parameter; absent or `null` yields `None`.
    pub fn opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, CommandError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.value(name).map(Some),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str, CommandError> {
        match self.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(CommandError::invalid(name, "expected a string")),
            None => Err(CommandError::MissingParameter(vec![name.to_string()])),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, CommandError> {
        match self.get(name) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(CommandError::invalid(name, "expected a boolean")),
            None => Err(CommandError::MissingParameter(vec![name.to_string()])),
        }
    }

    pub fn i64(&self, name: &str) -> Result<i64, CommandError> {
        match self.get(name).map(Value::as_i64) {
            Some(Some(n)) => Ok(n),
            Some(None) => Err(CommandError::invalid(name, "expected an integer")),
            None => Err(CommandError::MissingParameter(vec![name.to_string()])),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn into_params(self) -> Params {
        self.params
    }
}
