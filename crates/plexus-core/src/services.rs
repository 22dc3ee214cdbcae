//! Ports for the host collaborators consumed by the kernel.
//!
//! The crash reporter, the per-module settings store and the resource
//! arbiter live outside the core. Modules reach them through their
//! [`ModuleContext`](crate::module::ModuleContext); adapters implement these
//! traits (see `plexus-infra` for the file-backed settings store).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use plexus_types::{ModuleId, Params};
use serde_json::Value;
use tracing::error;

/// Crash telemetry sink.
pub trait CrashReporter: Send + Sync {
    /// Report an escaped failure. `context` carries at least `module`,
    /// `stage` and `error`.
    fn report_exception(&self, context: Params);
}

/// Reports crashes through `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrashReporter;

impl CrashReporter for LogCrashReporter {
    fn report_exception(&self, context: Params) {
        let module = context.get("module").and_then(Value::as_str).unwrap_or("-");
        let stage = context.get("stage").and_then(Value::as_str).unwrap_or("-");
        let message = context.get("error").and_then(Value::as_str).unwrap_or("");
        let details = Value::Object(context.clone());
        error!(module, stage, error = message, context = %details, "module crash reported");
    }
}

/// Persisted per-module settings blob.
///
/// Object-safe (boxed futures) so hosts can pick the backend at runtime.
pub trait SettingsStore: Send + Sync {
    fn load<'a>(&'a self, module: &'a ModuleId) -> BoxFuture<'a, anyhow::Result<Option<Value>>>;

    fn save<'a>(&'a self, module: &'a ModuleId, settings: &'a Value) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Settings kept in memory only. Used by tests and hosts without storage.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    entries: Mutex<HashMap<ModuleId, Value>>,
}

impl SettingsStore for InMemorySettingsStore {
    fn load<'a>(&'a self, module: &'a ModuleId) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        std::future::ready(Ok(entries.get(module).cloned())).boxed()
    }

    fn save<'a>(&'a self, module: &'a ModuleId, settings: &'a Value) -> BoxFuture<'a, anyhow::Result<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(module.clone(), settings.clone());
        std::future::ready(Ok(())).boxed()
    }
}

/// Invoked with the resource name when ownership changes.
pub type ResourceCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Exclusive hardware resource arbitration between modules.
pub trait ResourceArbiter: Send + Sync {
    /// Declare that `owner` may use `resource`. `on_acquired` fires when it
    /// gets the resource, `on_must_release` when another module claims it.
    /// A permanent registration is never asked to release.
    fn register_resource(
        &self,
        owner: &ModuleId,
        resource: &str,
        on_acquired: ResourceCallback,
        on_must_release: ResourceCallback,
        permanent: bool,
    ) -> anyhow::Result<()>;

    fn acquire_resource(&self, owner: &ModuleId, resource: &str) -> anyhow::Result<bool>;

    fn release_resource(&self, owner: &ModuleId, resource: &str) -> anyhow::Result<()>;
}

/// Collaborators handed to every module context.
#[derive(Clone)]
pub struct Services {
    pub crash_reporter: Arc<dyn CrashReporter>,
    pub settings: Option<Arc<dyn SettingsStore>>,
    pub resources: Option<Arc<dyn ResourceArbiter>>,
}

impl Services {
    pub fn with_crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = reporter;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceArbiter>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Report a failure of `module` during `stage`.
    pub fn report(&self, module: &ModuleId, stage: &str, error: impl std::fmt::Display) {
        let mut context = Params::new();
        context.insert("module".into(), Value::from(module.as_str()));
        context.insert("stage".into(), Value::from(stage));
        context.insert("error".into(), Value::from(error.to_string()));
        self.crash_reporter.report_exception(context);
    }
}

impl Default for Services {
    fn default() -> Self {
        Self {
            crash_reporter: Arc::new(LogCrashReporter),
            settings: None,
            resources: None,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("settings", &self.settings.is_some())
            .field("resources", &self.resources.is_some())
            .finish_non_exhaustive()
    }
}
