//! Process-wide execution phase and startup synchronization primitives.

pub mod latch;
pub mod phase;

pub use latch::{JoinGuard, Latch};
pub use phase::PhaseTracker;
