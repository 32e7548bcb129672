//! Application state for the payroll engine API.
//!
//! This module defines the shared application state that is available
//! to all request handlers.

use crate::config::ConfigLoader;
use crate::engine::PayrollEngine;
use crate::run::RunOptions;

/// Shared application state.
///
/// Holds the engine built from the loaded configuration and the limits
/// applied to payroll runs.
#[derive(Clone, Debug)]
pub struct AppState {
    engine: PayrollEngine,
    run_options: RunOptions,
}

impl AppState {
    /// Creates application state from a loaded configuration.
    pub fn new(config: ConfigLoader) -> Self {
        Self::from_parts(config.engine(), config.run_options())
    }

    /// Creates application state from an engine and run limits.
    pub fn from_parts(engine: PayrollEngine, run_options: RunOptions) -> Self {
        Self { engine, run_options }
    }

    /// Returns the payroll engine.
    pub fn engine(&self) -> &PayrollEngine {
        &self.engine
    }

    /// Returns the configured run limits.
    pub fn run_options(&self) -> RunOptions {
        self.run_options
    }
}
