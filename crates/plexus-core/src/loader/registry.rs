//! Loader-owned table of module records.

use dashmap::DashMap;
use plexus_types::ModuleId;
use plexus_types::module::{ModuleManifest, ModuleRecord};

/// Shared `id -> ModuleRecord` table.
///
/// Written by the loader, read by the built-in inventory module and the host.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    records: DashMap<ModuleId, ModuleRecord>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for every manifest not known yet.
    pub fn seed<'a>(&self, manifests: impl IntoIterator<Item = &'a ModuleManifest>) {
        for manifest in manifests {
            self.records
                .entry(manifest.id.clone())
                .or_insert_with(|| ModuleRecord::from(manifest));
        }
    }

    pub fn get(&self, id: &str) -> Option<ModuleRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Every record, sorted by id.
    pub fn all(&self) -> Vec<ModuleRecord> {
        let mut records: Vec<ModuleRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Apply `f` to the record of `id`, creating an empty one if needed.
    pub fn update<R>(&self, id: &ModuleId, f: impl FnOnce(&mut ModuleRecord) -> R) -> R {
        let mut record = self
            .records
            .entry(id.clone())
            .or_insert_with(|| ModuleRecord::new(id.clone()));
        f(record.value_mut())
    }

    /// Record that `dependent` pulled `dependency` in.
    pub fn add_loaded_by(&self, dependency: &ModuleId, dependent: &ModuleId) {
        self.update(dependency, |record| {
            if !record.loaded_by.contains(dependent) {
                record.loaded_by.push(dependent.clone());
            }
        });
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.records.get(id).is_some_and(|r| r.loaded)
    }

    /// Ids of the currently loaded modules, sorted.
    pub fn loaded(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self
            .records
            .iter()
            .filter(|r| r.loaded)
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_keeps_existing_records() {
        let registry = ModuleRegistry::new();
        let audio = ModuleManifest::new("audio").description("Audio output");
        registry.seed([&audio]);
        registry.update(&audio.id, |r| r.loaded = true);

        registry.seed([&ModuleManifest::new("audio"), &ModuleManifest::new("network")]);
        assert_eq!(registry.len(), 2);
        let record = registry.get("audio").unwrap();
        assert!(record.loaded);
        assert_eq!(record.description, "Audio output");
    }

    #[test]
    fn update_creates_missing_records() {
        let registry = ModuleRegistry::new();
        let id = ModuleId::from("ghost");
        registry.update(&id, |r| r.error = Some("unknown module".into()));
        let record = registry.get("ghost").unwrap();
        assert!(!record.installed);
        assert_eq!(record.error.as_deref(), Some("unknown module"));
    }

    #[test]
    fn loaded_by_edges_are_unique() {
        let registry = ModuleRegistry::new();
        let network = ModuleId::from("network");
        let audio = ModuleId::from("audio");
        registry.add_loaded_by(&network, &audio);
        registry.add_loaded_by(&network, &audio);
        registry.add_loaded_by(&network, &ModuleId::from("ui"));
        assert_eq!(registry.get("network").unwrap().loaded_by.len(), 2);
    }

    #[test]
    fn loaded_lists_only_loaded() {
        let registry = ModuleRegistry::new();
        registry.seed([&ModuleManifest::new("b"), &ModuleManifest::new("a"), &ModuleManifest::new("c")]);
        registry.update(&ModuleId::from("c"), |r| r.loaded = true);
        registry.update(&ModuleId::from("a"), |r| r.loaded = true);
        assert_eq!(registry.loaded(), vec![ModuleId::from("a"), ModuleId::from("c")]);
        assert!(registry.is_loaded("a"));
        assert!(!registry.is_loaded("b"));
        assert!(registry.all().iter().map(|r| r.id.as_str()).eq(["a", "b", "c"]));
    }
}
