//! plexus host entry point.
//!
//! Binary name: `plexusd`
//!
//! Initializes logging, loads the kernel configuration, starts every core and
//! configured module through the inventory, then runs until Ctrl+C/SIGTERM.

mod system;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use plexus_core::loader::{Inventory, ModuleCatalog};
use plexus_core::services::Services;
use plexus_infra::config::{default_config_path, default_settings_dir, load_kernel_config};
use plexus_infra::settings::FileSettingsStore;
use plexus_observe::tracing_setup::{TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing};
use plexus_types::config::KernelConfig;
use plexus_types::module::ModuleManifest;

use system::{SYSTEM_MODULE_ID, SystemModule};

/// Run a plexus module host.
#[derive(Parser)]
#[command(name = "plexusd", version, about, long_about = None)]
struct Cli {
    /// Kernel config file (default: <config dir>/plexus/config.toml).
    #[arg(long, env = "PLEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for per-module settings files.
    #[arg(long, env = "PLEXUS_SETTINGS_DIR")]
    settings_dir: Option<PathBuf>,

    /// Print the load report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long)]
    otel: bool,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// More logging (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        default_filter: filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
        enable_otel: cli.otel,
        json: cli.log_json,
    })
    .map_err(|e| anyhow::anyhow!(e))?;

    let config = match cli.config.or_else(default_config_path) {
        Some(path) => load_kernel_config(&path).await,
        None => {
            tracing::warn!("no platform config directory, using the default configuration");
            KernelConfig::default()
        }
    };
    let config = with_builtin_manifests(config);

    let settings_dir = cli.settings_dir.unwrap_or_else(default_settings_dir);
    let services = Services::default().with_settings(Arc::new(FileSettingsStore::new(&settings_dir)));

    let mut catalog = ModuleCatalog::new();
    catalog.register_default::<SystemModule>(SYSTEM_MODULE_ID);

    let inventory = Inventory::new(config, catalog, services);
    let report = inventory.load().await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    for failure in &report.failed {
        tracing::warn!(module = %failure.module, error = %failure.error, "module not loaded");
    }
    tracing::info!(
        phase = %report.phase,
        loaded = ?report.loaded,
        settings = %settings_dir.display(),
        "plexus host running, press Ctrl+C to stop"
    );

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    inventory.shutdown().await;

    shutdown_tracing();
    Ok(())
}

/// Make the bundled modules known to the loader unless the config
/// already describes them.
fn with_builtin_manifests(mut config: KernelConfig) -> KernelConfig {
    if !config.manifests.iter().any(|m| m.id == SYSTEM_MODULE_ID) {
        config
            .manifests
            .push(ModuleManifest::new(SYSTEM_MODULE_ID).description("Host introspection"));
    }
    config
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
