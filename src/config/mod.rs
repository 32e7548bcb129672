//! Configuration loading for the payroll engine.
//!
//! This module loads an organization's settings, pay structure templates,
//! worker structures, tax rules, allowances and opening usage balances from
//! YAML files.
//!
//! # Example
//!
//! ```no_run
//! use payroll_engine::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load("./config/acme").unwrap();
//! let engine = loader.engine();
//! ```

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    AllowancesFile, EngineConfig, EngineSection, ServerConfig, TaxRulesFile, UsageFile,
    WorkersFile,
};
