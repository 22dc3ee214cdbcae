//! Compiled-in module implementations, looked up by id.

use std::collections::HashMap;
use std::sync::Arc;

use plexus_types::ModuleId;
use plexus_types::module::ModuleManifest;

use crate::module::{BoxModule, Module};

/// Builds a module instance from its manifest.
pub type ModuleFactory = Arc<dyn Fn(&ModuleManifest) -> anyhow::Result<BoxModule> + Send + Sync>;

/// `id -> factory` table the loader resolves implementations from.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: HashMap<ModuleId, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for `id`.
    pub fn register<F>(&mut self, id: impl Into<ModuleId>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleManifest) -> anyhow::Result<BoxModule> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    /// Register a module built by `Default`.
    pub fn register_default<M: Module + Default>(&mut self, id: impl Into<ModuleId>) -> &mut Self {
        self.register(id, |_| Ok(BoxModule::new(M::default())))
    }

    pub fn factory(&self, id: &str) -> Option<ModuleFactory> {
        self.factories.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Probe, TestModule};

    #[test]
    fn register_and_build() {
        let probe = Arc::new(Probe::default());
        let mut catalog = ModuleCatalog::new();
        catalog
            .register("audio", move |_| Ok(BoxModule::new(TestModule::new(probe.clone()))))
            .register("broken", |m| anyhow::bail!("cannot build {}", m.id));

        assert_eq!(catalog.ids(), vec![ModuleId::from("audio"), ModuleId::from("broken")]);
        assert!(catalog.contains("audio"));
        assert!(catalog.factory("network").is_none());

        let build = catalog.factory("audio").unwrap();
        let module = build(&ModuleManifest::new("audio")).unwrap();
        assert!(!module.command_specs().is_empty());

        let err = catalog.factory("broken").unwrap()(&ModuleManifest::new("broken")).unwrap_err();
        assert_eq!(err.to_string(), "cannot build broken");
    }
}
