//! The `system` module bundled with the host.

use plexus_core::module::{CommandArgs, CommandError, CommandSpec, Module, ModuleContext};
use plexus_types::Params;
use serde_json::{Value, json};

pub const SYSTEM_MODULE_ID: &str = "system";

/// Host introspection over the bus: liveness, phase, subscriptions.
#[derive(Debug, Default)]
pub struct SystemModule;

impl Module for SystemModule {
    fn command_specs(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("ping"),
            CommandSpec::new("get_version"),
            CommandSpec::new("get_phase"),
            CommandSpec::new("get_subscriptions"),
        ]
    }

    async fn on_start(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let mut params = Params::new();
        params.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
        ctx.send_event("system_started", params).await?;
        Ok(())
    }

    async fn handle_command(
        &self,
        name: &str,
        _args: CommandArgs,
        ctx: &ModuleContext,
    ) -> Result<Value, CommandError> {
        match name {
            "ping" => Ok(json!("pong")),
            "get_version" => Ok(json!(env!("CARGO_PKG_VERSION"))),
            "get_phase" => Ok(json!(ctx.phase())),
            "get_subscriptions" => Ok(json!(ctx.bus().subscriptions())),
            other => Err(CommandError::failure(format!("unhandled command {other}"))),
        }
    }
}
