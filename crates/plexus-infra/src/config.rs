//! Kernel configuration loader.
//!
//! Reads the host's `config.toml` and deserializes it into [`KernelConfig`].
//! Falls back to defaults when the file is missing or malformed, so a host
//! always starts with at least the core modules.

use std::path::{Path, PathBuf};

use plexus_types::config::KernelConfig;

const APP_DIR: &str = "plexus";

/// `<platform config dir>/plexus/config.toml`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// `<platform data dir>/plexus/settings`, falling back to `./settings`.
pub fn default_settings_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("settings")
}

/// Load the kernel configuration from `path`.
///
/// - Missing file: [`KernelConfig::default()`].
/// - Unreadable or unparsable file: logs a warning, returns the default.
pub async fn load_kernel_config(path: &Path) -> KernelConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return KernelConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return KernelConfig::default();
        }
    };

    match toml::from_str::<KernelConfig>(&content) {
        Ok(config) => {
            tracing::debug!(
                path = %path.display(),
                modules = config.modules.len(),
                manifests = config.manifests.len(),
                "kernel config loaded"
            );
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_types::ModuleId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_kernel_config(&tmp.path().join("config.toml")).await;
        assert_eq!(config.core_modules, vec![ModuleId::from("inventory")]);
        assert!(config.manifests.is_empty());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
modules = ["audio"]

[bus]
mailbox_capacity = 8

[[manifests]]
id = "audio"
dependencies = ["network"]

[[manifests]]
id = "network"
installed = false
"#,
        )
        .await
        .unwrap();

        let config = load_kernel_config(&path).await;
        assert_eq!(config.modules, vec![ModuleId::from("audio")]);
        assert_eq!(config.bus.mailbox_capacity, 8);
        assert_eq!(config.manifests.len(), 2);
        assert!(!config.manifests[1].installed);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "modules = [unterminated").await.unwrap();

        let config = load_kernel_config(&path).await;
        assert!(config.modules.is_empty());
        assert_eq!(config.bus.mailbox_capacity, 100);
    }

    #[test]
    fn default_paths_end_in_app_dir() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("plexus/config.toml"));
        }
        assert!(default_settings_dir().ends_with("settings"));
    }
}
