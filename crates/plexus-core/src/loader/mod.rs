//! Dependency-ordered module loading.

pub mod catalog;
pub mod graph;
pub mod inventory;
pub mod module;
pub mod registry;

pub use catalog::{ModuleCatalog, ModuleFactory};
pub use graph::find_dependency_cycles;
pub use inventory::{Inventory, LoadError, LoadOutcome, LoadReport};
pub use module::{INVENTORY_MODULE_ID, InventoryModule};
pub use registry::ModuleRegistry;
