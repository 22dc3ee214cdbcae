//! In-process message bus with bounded mailboxes and request/response routing.
//!
//! - `mailbox` -- bounded drop-oldest queue owned by one module
//! - `bus` -- `MessageBus` with subscriptions, routing, activity tracking and idle purge

pub mod bus;
pub mod mailbox;

pub use bus::MessageBus;
pub use mailbox::{Mailbox, MailboxEntry};
