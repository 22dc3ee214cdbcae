//! File-backed module settings.
//!
//! One pretty-printed JSON file per module: `{dir}/{module_id}.json`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use plexus_core::services::SettingsStore;
use plexus_types::ModuleId;
use serde_json::Value;

/// [`SettingsStore`] writing each module's settings to its own file.
///
/// All I/O goes through `tokio::fs`, so module hooks never block a worker.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Settings file of `module`.
    pub fn path_for(&self, module: &ModuleId) -> PathBuf {
        self.dir.join(format!("{module}.json"))
    }

    async fn read(&self, module: &ModuleId) -> anyhow::Result<Option<Value>> {
        let path = self.path_for(module);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let value = serde_json::from_str(&content)
            .with_context(|| format!("malformed settings file {}", path.display()))?;
        Ok(Some(value))
    }

    async fn write(&self, module: &ModuleId, settings: &Value) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(module);
        let content = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!(module = %module, path = %path.display(), "settings saved");
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn load<'a>(&'a self, module: &'a ModuleId) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        self.read(module).boxed()
    }

    fn save<'a>(&'a self, module: &'a ModuleId, settings: &'a Value) -> BoxFuture<'a, anyhow::Result<()>> {
        self.write(module, settings).boxed()
    }
}
