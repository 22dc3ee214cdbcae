//! Infrastructure layer for plexus.
//!
//! Implements the ports defined in `plexus-core` against the local machine:
//! the TOML kernel configuration loader and the file-backed settings store.

pub mod config;
pub mod settings;
