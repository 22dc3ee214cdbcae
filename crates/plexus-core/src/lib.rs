//! Runtime kernel of the plexus module host.
//!
//! Independently developed modules run concurrently and talk to each other
//! only through the [`message::MessageBus`]. This crate provides:
//! - `message` -- bounded per-module mailboxes, direct/broadcast/buffered routing, idle purge
//! - `module` -- the `Module` contract, command registry and the per-module actor runtime
//! - `lifecycle` -- execution phase tracking and startup latches
//! - `loader` -- dependency-ordered module loading (`Inventory`) and the built-in inventory module
//! - `services` -- ports for the crash reporter, settings store and resource arbiter
//!
//! It depends only on `plexus-types` -- never on `plexus-infra`.

pub mod lifecycle;
pub mod loader;
pub mod message;
pub mod module;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
