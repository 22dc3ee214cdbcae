//! Module manifest and loader-owned module records.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::id::ModuleId;

/// Static description of a known module (installed or available).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub id: ModuleId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub author: Option<String>,
    /// Ids of the modules this one needs loaded first.
    #[serde(default)]
    pub dependencies: Vec<ModuleId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_installed")]
    pub installed: bool,
}

fn default_installed() -> bool {
    true
}

impl ModuleManifest {
    pub fn new(id: impl Into<ModuleId>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            version: None,
            author: None,
            dependencies: Vec::new(),
            tags: Vec::new(),
            installed: true,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModuleId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}

/// Loader-owned metadata about one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub installed: bool,
    pub loaded: bool,
    /// Loaded only as a transitive dependency, never requested directly.
    pub is_library: bool,
    /// Requested directly (core or configured), which pins `is_library` to false.
    #[serde(default)]
    pub requested: bool,
    pub dependencies: Vec<ModuleId>,
    /// Modules that pulled this one in as a dependency.
    pub loaded_by: Vec<ModuleId>,
    pub description: String,
    pub version: Option<Version>,
    pub tags: Vec<String>,
    /// Load failure, if any.
    pub error: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    /// An empty record for a module that is known but not loaded yet.
    pub fn new(id: impl Into<ModuleId>) -> Self {
        Self {
            id: id.into(),
            installed: false,
            loaded: false,
            is_library: false,
            requested: false,
            dependencies: Vec::new(),
            loaded_by: Vec::new(),
            description: String::new(),
            version: None,
            tags: Vec::new(),
            error: None,
            loaded_at: None,
        }
    }

    /// Copy descriptive metadata from a manifest.
    pub fn apply_manifest(&mut self, manifest: &ModuleManifest) {
        self.installed = manifest.installed;
        self.description = manifest.description.clone();
        self.version = manifest.version.clone();
        self.tags = manifest.tags.clone();
        self.dependencies = manifest.dependencies.clone();
    }
}

impl From<&ModuleManifest> for ModuleRecord {
    fn from(manifest: &ModuleManifest) -> Self {
        let mut record = Self::new(manifest.id.clone());
        record.apply_manifest(manifest);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_from_toml_with_defaults() {
        let manifest: ModuleManifest = toml::from_str(
            r#"
id = "audio"
version = "1.2.0"
dependencies = ["network"]
"#,
        )
        .unwrap();
        assert_eq!(manifest.id, "audio");
        assert_eq!(manifest.version, Some(Version::new(1, 2, 0)));
        assert_eq!(manifest.dependencies, vec![ModuleId::from("network")]);
        assert!(manifest.installed);
        assert!(manifest.tags.is_empty());
    }

    #[test]
    fn record_from_manifest_copies_metadata() {
        let manifest = ModuleManifest::new("audio")
            .description("Audio output")
            .depends_on(["network"]);
        let record = ModuleRecord::from(&manifest);
        assert_eq!(record.id, "audio");
        assert!(record.installed);
        assert!(!record.loaded);
        assert!(!record.is_library);
        assert_eq!(record.description, "Audio output");
        assert_eq!(record.dependencies.len(), 1);
    }
}
