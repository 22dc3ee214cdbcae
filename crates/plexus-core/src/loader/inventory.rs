//! Module loader and startup orchestrator.
//!
//! `Inventory` resolves the dependency closure of the core and configured
//! modules, starts one actor per module and drives the execution phase:
//!
//! - BOOT -> INIT before the first module loads
//! - INIT -> CONFIG once every requested module is started
//! - CONFIG -> RUN once every module finished configuring (join latches)
//! - RUN -> STOP on shutdown
//!
//! Loading recurses into dependencies first. A module already on the
//! current load path is skipped, which breaks dependency cycles. A module
//! loaded only because something depends on it is a *library*; requesting
//! it directly later promotes it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use plexus_types::config::KernelConfig;
use plexus_types::module::ModuleManifest;
use plexus_types::{ExecutionStep, ModuleId};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::catalog::ModuleCatalog;
use super::graph::find_dependency_cycles;
use super::module::{INVENTORY_MODULE_ID, InventoryModule};
use super::registry::ModuleRegistry;
use crate::lifecycle::{Latch, PhaseTracker};
use crate::message::MessageBus;
use crate::module::dispatch::panic_message;
use crate::module::{ActorState, BoxModule, ModuleClient, ModuleHandle, RegistryError, SharedContext};
use crate::services::Services;

/// Successful result of loading one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Instantiated and started by this call.
    Loaded,
    /// Already running as a library; now also requested directly.
    Promoted,
    /// Already running.
    AlreadyLoaded,
    /// Already on the current load path (dependency cycle).
    CycleSkipped,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module '{0}' is not in the manifest")]
    UnknownModule(ModuleId),

    #[error("module '{0}' is not installed")]
    NotInstalled(ModuleId),

    #[error("no implementation registered for module '{0}'")]
    MissingImplementation(ModuleId),

    #[error("failed to instantiate module '{module}': {reason}")]
    Instantiation { module: ModuleId, reason: String },

    #[error("module '{module}' declares invalid commands: {source}")]
    Registry {
        module: ModuleId,
        #[source]
        source: RegistryError,
    },

    #[error("dependency '{dependency}' of '{module}' failed: {source}")]
    Dependency {
        module: ModuleId,
        dependency: ModuleId,
        #[source]
        source: Box<LoadError>,
    },

    #[error("module '{0}' is not loaded")]
    NotLoaded(ModuleId),
}

/// A top-level load attempt that failed.
#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub module: ModuleId,
    pub error: String,
}

/// Summary of [`Inventory::load`].
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Every module running after the load, libraries included.
    pub loaded: Vec<ModuleId>,
    pub failed: Vec<LoadFailure>,
    /// Dependency cycles found (and broken) in the requested closure.
    pub cycles: Vec<Vec<ModuleId>>,
    pub phase: ExecutionStep,
}

impl LoadReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Loads, tracks and stops module actors.
pub struct Inventory {
    config: KernelConfig,
    manifests: HashMap<ModuleId, ModuleManifest>,
    catalog: ModuleCatalog,
    registry: Arc<ModuleRegistry>,
    shared: SharedContext,
    handles: DashMap<ModuleId, ModuleHandle>,
    /// Join latches of the modules started during the current load.
    joins: Mutex<Vec<(ModuleId, Latch)>>,
    purge_cancel: CancellationToken,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inventory {
    /// Build the loader and its bus. The built-in `inventory` module is
    /// registered unless the catalog already provides one.
    pub fn new(config: KernelConfig, mut catalog: ModuleCatalog, services: Services) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus.clone(), PhaseTracker::new()));
        let shared = SharedContext::new(bus, services, config.runtime.clone());
        let registry = Arc::new(ModuleRegistry::new());

        let mut manifests: HashMap<ModuleId, ModuleManifest> = config
            .manifests
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
        manifests
            .entry(ModuleId::from(INVENTORY_MODULE_ID))
            .or_insert_with(|| {
                ModuleManifest::new(INVENTORY_MODULE_ID).description("Module inventory")
            });
        registry.seed(manifests.values());

        if !catalog.contains(INVENTORY_MODULE_ID) {
            let records = Arc::clone(&registry);
            catalog.register(INVENTORY_MODULE_ID, move |_| {
                Ok(BoxModule::new(InventoryModule::new(Arc::clone(&records))))
            });
        }

        Self {
            config,
            manifests,
            catalog,
            registry,
            shared,
            handles: DashMap::new(),
            joins: Mutex::new(Vec::new()),
            purge_cancel: CancellationToken::new(),
            purge_task: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.shared.bus
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn phase(&self) -> &PhaseTracker {
        self.shared.phase()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Actor state of a loaded module.
    pub fn module_state(&self, id: &str) -> Option<ActorState> {
        self.handles.get(id).map(|h| h.state())
    }

    fn is_instantiated(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    /// Load every core module, then every configured module, and bring the
    /// host to RUN.
    ///
    /// Failures never abort the load: each top-level module gets its own
    /// error boundary and is reported in the returned [`LoadReport`].
    pub async fn load(&self) -> LoadReport {
        let phase = self.phase();
        phase.advance(ExecutionStep::Init);
        self.shared.bus.app_configured();
        self.start_purge_task();

        let requested: Vec<ModuleId> = self
            .config
            .core_modules
            .iter()
            .chain(&self.config.modules)
            .cloned()
            .collect();
        let manifests: Vec<ModuleManifest> = self.manifests.values().cloned().collect();
        let cycles = find_dependency_cycles(&manifests, &requested);
        for cycle in &cycles {
            warn!(?cycle, "dependency cycle detected, it will be broken at load time");
        }

        let mut failed = Vec::new();
        for id in &self.config.core_modules {
            if let Err(err) = self.load_top_level(id).await {
                error!(module = %id, error = %err, "core module failed to load, continuing degraded");
                self.shared.services.report(id, "load", &err);
                failed.push(LoadFailure {
                    module: id.clone(),
                    error: err.to_string(),
                });
            }
        }
        for id in &self.config.modules {
            if let Err(err) = self.load_top_level(id).await {
                warn!(module = %id, error = %err, "module failed to load");
                failed.push(LoadFailure {
                    module: id.clone(),
                    error: err.to_string(),
                });
            }
        }

        phase.advance(ExecutionStep::Config);
        self.await_joins().await;
        phase.advance(ExecutionStep::Run);
        self.shared.core_sync.set();

        let report = LoadReport {
            loaded: self.registry.loaded(),
            failed,
            cycles,
            phase: phase.current(),
        };
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "inventory loaded"
        );
        report
    }

    fn start_purge_task(&self) {
        let mut task = self.purge_task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_none() {
            *task = Some(self.shared.bus.spawn_purge_task(self.purge_cancel.clone()));
        }
    }

    /// Wait for every join latch collected during the load, bounded by the
    /// core barrier timeout.
    async fn await_joins(&self) {
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + self.shared.runtime.core_barrier_timeout();
        for (id, latch) in joins {
            if tokio::time::timeout_at(deadline, latch.wait()).await.is_err() {
                warn!(module = %id, "module did not finish configuring in time");
            }
        }
        debug!("startup barrier reached");
    }

    /// Load `id` as a directly requested module.
    async fn load_top_level(&self, id: &ModuleId) -> Result<LoadOutcome, LoadError> {
        self.registry.update(id, |record| record.requested = true);
        let mut visited = Vec::new();
        match self.load_module(id.clone(), &mut visited).await {
            Ok(outcome) => {
                debug!(module = %id, ?outcome, "top-level load finished");
                Ok(outcome)
            }
            Err(err) => {
                self.registry.update(id, |record| record.error = Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Load `id` and, first, its missing dependencies.
    ///
    /// `visited` accumulates every id entered during one top-level load.
    fn load_module<'a>(
        &'a self,
        id: ModuleId,
        visited: &'a mut Vec<ModuleId>,
    ) -> BoxFuture<'a, Result<LoadOutcome, LoadError>> {
        async move {
            if visited.contains(&id) {
                debug!(module = %id, "already on the load path, skipping");
                return Ok(LoadOutcome::CycleSkipped);
            }
            visited.push(id.clone());

            if self.is_instantiated(&id) {
                let was_library =
                    self.registry.update(&id, |record| std::mem::replace(&mut record.is_library, false));
                return Ok(if was_library {
                    info!(module = %id, "library module promoted");
                    LoadOutcome::Promoted
                } else {
                    LoadOutcome::AlreadyLoaded
                });
            }

            let manifest = self
                .manifests
                .get(&id)
                .cloned()
                .ok_or_else(|| LoadError::UnknownModule(id.clone()))?;
            if !manifest.installed {
                return Err(LoadError::NotInstalled(id));
            }
            let factory = self
                .catalog
                .factory(&id)
                .ok_or_else(|| LoadError::MissingImplementation(id.clone()))?;

            for dependency in &manifest.dependencies {
                if !self.is_instantiated(dependency) {
                    self.load_module(dependency.clone(), visited)
                        .await
                        .map_err(|source| LoadError::Dependency {
                            module: id.clone(),
                            dependency: dependency.clone(),
                            source: Box::new(source),
                        })?;
                    self.registry.update(dependency, |record| {
                        if !record.requested {
                            record.is_library = true;
                        }
                    });
                }
                self.registry.add_loaded_by(dependency, &id);
            }

            let module = match std::panic::catch_unwind(AssertUnwindSafe(|| factory(&manifest))) {
                Ok(Ok(module)) => module,
                Ok(Err(err)) => {
                    return Err(LoadError::Instantiation {
                        module: id,
                        reason: format!("{err:#}"),
                    });
                }
                Err(panic) => {
                    return Err(LoadError::Instantiation {
                        module: id,
                        reason: panic_message(panic.as_ref()),
                    });
                }
            };

            let client = ModuleClient::new(id.clone(), module, self.shared.for_module())
                .map_err(|source| LoadError::Registry {
                    module: id.clone(),
                    source,
                })?;
            let join = client.join_latch();
            self.shared.bus.add_subscription(id.clone());
            self.handles.insert(id.clone(), client.spawn());
            self.joins
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id.clone(), join));

            self.registry.update(&id, |record| {
                record.apply_manifest(&manifest);
                record.loaded = true;
                record.error = None;
                record.loaded_at = Some(Utc::now());
            });
            info!(module = %id, "module loaded");
            Ok(LoadOutcome::Loaded)
        }
        .boxed()
    }

    /// Stop one module and remove its mailbox.
    pub async fn unload_module(&self, id: &ModuleId) -> Result<(), LoadError> {
        let (_, mut handle) = self
            .handles
            .remove(id)
            .ok_or_else(|| LoadError::NotLoaded(id.clone()))?;
        handle.stop();
        handle.join(self.shared.runtime.stop_timeout()).await;
        // An aborted actor never got to unsubscribe itself.
        if self.shared.bus.remove_subscription(id).is_ok() {
            debug!(module = %id, "removed mailbox of aborted actor");
        }
        self.registry.update(id, |record| {
            record.loaded = false;
            record.loaded_at = None;
        });
        info!(module = %id, "module unloaded");
        Ok(())
    }

    /// Stop every actor (in no particular order) and the purge task.
    pub async fn shutdown(&self) {
        self.phase().advance(ExecutionStep::Stop);
        self.purge_cancel.cancel();

        let ids: Vec<ModuleId> = self.handles.iter().map(|h| h.key().clone()).collect();
        let mut handles: Vec<ModuleHandle> = ids
            .iter()
            .filter_map(|id| self.handles.remove(id).map(|(_, handle)| handle))
            .collect();
        for handle in &handles {
            handle.stop();
        }

        let timeout = self.shared.runtime.stop_timeout();
        let finished = join_all(handles.iter_mut().map(|handle| handle.join(timeout))).await;
        for (handle, clean) in handles.iter().zip(finished) {
            if !clean {
                if let Err(err) = self.shared.bus.remove_subscription(handle.id()) {
                    debug!(module = %handle.id(), error = %err, "mailbox already removed");
                }
            }
            self.registry.update(handle.id(), |record| record.loaded = false);
        }

        let purge = self
            .purge_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = purge {
            if let Err(err) = task.await {
                debug!(error = %err, "purge task ended abnormally");
            }
        }
        info!(stopped = handles.len(), "inventory shut down");
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("phase", &self.phase().current())
            .field("modules", &self.handles.len())
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
