//! Shared domain types for plexus.
//!
//! This crate contains the types exchanged between the message bus, the
//! module runtime and the loader: module ids, message envelopes, responses,
//! the execution phase, module manifests/records, kernel configuration and
//! the bus error kinds.
//!
//! Zero runtime dependencies -- only serde, uuid, chrono, semver, thiserror.

pub mod config;
pub mod error;
pub mod id;
pub mod message;
pub mod module;
pub mod phase;

pub use error::BusError;
pub use id::ModuleId;
pub use message::{Command, Event, Message, Params, Response};
pub use phase::ExecutionStep;
