//! Shared startup context and per-module bootstrap copies.

use std::sync::Arc;

use plexus_types::config::RuntimeConfig;

use crate::lifecycle::{Latch, PhaseTracker};
use crate::message::MessageBus;
use crate::services::Services;

/// Everything the loader shares with every actor.
#[derive(Debug, Clone)]
pub struct SharedContext {
    pub bus: Arc<MessageBus>,
    pub services: Services,
    /// Released by the loader once every module finished configuring.
    pub core_sync: Latch,
    pub runtime: RuntimeConfig,
}

impl SharedContext {
    pub fn new(bus: Arc<MessageBus>, services: Services, runtime: RuntimeConfig) -> Self {
        Self {
            bus,
            services,
            core_sync: Latch::new(),
            runtime,
        }
    }

    pub fn phase(&self) -> &PhaseTracker {
        self.bus.phase()
    }

    /// A private copy for one module, with its own join latch.
    pub fn for_module(&self) -> Bootstrap {
        Bootstrap {
            shared: self.clone(),
            join: Latch::new(),
        }
    }
}

/// Startup context of a single actor.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub shared: SharedContext,
    /// Set when the module's configuration step ends, success or not.
    pub join: Latch,
}
