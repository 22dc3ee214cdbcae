//! The module contract and the per-module actor runtime.

pub mod bootstrap;
pub mod client;
pub mod command;
pub mod context;
pub mod dispatch;
pub mod traits;

pub use bootstrap::{Bootstrap, SharedContext};
pub use client::{ActorState, ModuleClient, ModuleHandle};
pub use command::{
    COMMAND_SENDER, CommandArgs, CommandError, CommandRegistry, CommandSpec, RegistryError,
    UNKNOWN_COMMAND,
};
pub use context::ModuleContext;
pub use dispatch::Dispatcher;
pub use traits::{BoxModule, Module, ModuleDyn};
