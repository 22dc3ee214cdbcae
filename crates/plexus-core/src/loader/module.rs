//! The built-in `inventory` core module: answers queries about module records.

use std::sync::Arc;

use plexus_types::module::ModuleRecord;
use serde::Serialize;
use serde_json::{Value, json};

use super::registry::ModuleRegistry;
use crate::module::{CommandArgs, CommandError, CommandSpec, Module, ModuleContext};

/// Id under which the inventory module is registered.
pub const INVENTORY_MODULE_ID: &str = "inventory";

pub struct InventoryModule {
    registry: Arc<ModuleRegistry>,
}

impl InventoryModule {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    fn record(&self, args: &CommandArgs) -> Result<ModuleRecord, CommandError> {
        let id = args.str("module")?;
        self.registry
            .get(id)
            .ok_or_else(|| CommandError::failure(format!("module '{id}' does not exist")))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::failure(e.to_string()))
}

impl Module for InventoryModule {
    fn command_specs(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("get_modules"),
            CommandSpec::new("get_module").required("module"),
            CommandSpec::new("is_module_loaded").required("module"),
            CommandSpec::new("get_module_dependencies").required("module"),
            CommandSpec::new("get_modules_loaded_by").required("module"),
        ]
    }

    async fn handle_command(
        &self,
        name: &str,
        args: CommandArgs,
        _ctx: &ModuleContext,
    ) -> Result<Value, CommandError> {
        match name {
            "get_modules" => to_json(&self.registry.all()),
            "get_module" => to_json(&self.record(&args)?),
            "is_module_loaded" => Ok(json!(self.registry.is_loaded(args.str("module")?))),
            "get_module_dependencies" => to_json(&self.record(&args)?.dependencies),
            "get_modules_loaded_by" => to_json(&self.record(&args)?.loaded_by),
            other => Err(CommandError::failure(format!("unhandled command {other}"))),
        }
    }
}
