//! Configuration types for the payroll engine.
//!
//! This module contains the strongly-typed structures deserialized from the
//! YAML files of a configuration directory.

use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::models::{AllowanceDefinition, EmployeeAllowanceUsage, TaxRuleSet, WorkerPayStructure};
use crate::run::RunOptions;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// The port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Engine and payroll run settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSection {
    /// Maximum employees computed at once during a run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-employee time budget, in milliseconds.
    #[serde(default = "default_employee_timeout_ms")]
    pub employee_timeout_ms: u64,
    /// Whole-run time budget, in milliseconds.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    /// Fixed "today" for resolution; absent means the UTC wall clock.
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            employee_timeout_ms: default_employee_timeout_ms(),
            run_timeout_ms: default_run_timeout_ms(),
            reference_date: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_employee_timeout_ms() -> u64 {
    5_000
}

fn default_run_timeout_ms() -> u64 {
    300_000
}

/// Contents of `engine.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineSection,
}

impl EngineConfig {
    /// Settings for [`crate::engine::PayrollEngine`].
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            reference_date: self.engine.reference_date,
        }
    }

    /// Limits for [`crate::run::run_payroll`].
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_concurrency: self.engine.max_concurrency,
            employee_timeout: Duration::from_millis(self.engine.employee_timeout_ms),
            run_timeout: Duration::from_millis(self.engine.run_timeout_ms),
        }
    }
}

/// Contents of `workers.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersFile {
    /// Worker pay structures, each with its overrides.
    #[serde(default)]
    pub workers: Vec<WorkerPayStructure>,
}

/// Contents of `tax_rules.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxRulesFile {
    /// Tax rule sets.
    #[serde(default)]
    pub tax_rules: Vec<TaxRuleSet>,
}

/// Contents of `allowances.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AllowancesFile {
    /// Allowance definitions.
    #[serde(default)]
    pub allowances: Vec<AllowanceDefinition>,
}

/// Contents of `usage.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageFile {
    /// Opening usage balances.
    #[serde(default)]
    pub usage: Vec<EmployeeAllowanceUsage>,
}
