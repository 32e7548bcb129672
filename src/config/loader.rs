//! Configuration loading functionality.
//!
//! This module provides the [`ConfigLoader`] type for loading an
//! organization's pay structures, tax rules and allowances from YAML files
//! into an [`InMemoryStore`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::engine::PayrollEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::PayStructureTemplate;
use crate::run::RunOptions;
use crate::store::InMemoryStore;

use super::types::{AllowancesFile, EngineConfig, TaxRulesFile, UsageFile, WorkersFile};

/// Loads a configuration directory and provides the engine built from it.
///
/// # Directory Structure
///
/// ```text
/// config/acme/
/// ├── engine.yaml        # Server and engine settings
/// ├── templates/         # One pay structure template version per file
/// │   └── standard-1.0.0.yaml
/// ├── workers.yaml       # Worker pay structures and overrides
/// ├── tax_rules.yaml     # Tax rule sets and brackets
/// ├── allowances.yaml    # Allowance definitions
/// └── usage.yaml         # Optional opening usage balances
/// ```
///
/// Every record passes through the store's write-time checks, so a
/// directory with overlapping effective ranges or duplicate template
/// versions fails to load.
///
/// # Example
///
/// ```no_run
/// use payroll_engine::config::ConfigLoader;
///
/// let loader = ConfigLoader::load("./config/acme").unwrap();
/// println!("Listening on port {}", loader.config().server.port);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: EngineConfig,
    store: Arc<InMemoryStore>,
}

impl ConfigLoader {
    /// Loads configuration from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration directory (e.g., "./config/acme")
    ///
    /// # Returns
    ///
    /// Returns a `ConfigLoader` instance on success, or an error if:
    /// - Any required file is missing (`ConfigNotFound`)
    /// - Any file contains invalid YAML (`ConfigParseError`)
    /// - Any record is rejected by the store (`ConfigParseError` naming the file)
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let store = Arc::new(InMemoryStore::new());

        let config = Self::load_yaml::<EngineConfig>(&path.join("engine.yaml"))?;

        let template_paths = Self::template_files(&path.join("templates"))?;
        for template_path in &template_paths {
            let template = Self::load_yaml::<PayStructureTemplate>(template_path)?;
            store
                .insert_template(template)
                .map_err(|e| Self::rejected(template_path, e))?;
        }

        let workers_path = path.join("workers.yaml");
        let workers = Self::load_yaml::<WorkersFile>(&workers_path)?;
        let worker_count = workers.workers.len();
        for worker in workers.workers {
            store
                .insert_worker_structure(worker)
                .map_err(|e| Self::rejected(&workers_path, e))?;
        }

        let tax_rules_path = path.join("tax_rules.yaml");
        let tax_rules = Self::load_yaml::<TaxRulesFile>(&tax_rules_path)?;
        for rule_set in tax_rules.tax_rules {
            store
                .insert_tax_rule_set(rule_set)
                .map_err(|e| Self::rejected(&tax_rules_path, e))?;
        }

        let allowances_path = path.join("allowances.yaml");
        let allowances = Self::load_yaml::<AllowancesFile>(&allowances_path)?;
        for allowance in allowances.allowances {
            store
                .insert_allowance(allowance)
                .map_err(|e| Self::rejected(&allowances_path, e))?;
        }

        // Opening balances are optional
        let usage_path = path.join("usage.yaml");
        if usage_path.exists() {
            let usage = Self::load_yaml::<UsageFile>(&usage_path)?;
            for row in usage.usage {
                store
                    .set_usage(row)
                    .map_err(|e| Self::rejected(&usage_path, e))?;
            }
        }

        info!(
            path = %path.display(),
            templates = template_paths.len(),
            workers = worker_count,
            "Configuration loaded"
        );

        Ok(Self { config, store })
    }

    /// Loads and parses a YAML file.
    fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let path_str = path.display().to_string();

        let content = fs::read_to_string(path).map_err(|_| EngineError::ConfigNotFound {
            path: path_str.clone(),
        })?;

        serde_yaml::from_str(&content).map_err(|e| EngineError::ConfigParseError {
            path: path_str,
            message: e.to_string(),
        })
    }

    /// Lists the template files, sorted by name.
    fn template_files(templates_dir: &Path) -> EngineResult<Vec<PathBuf>> {
        let dir_str = templates_dir.display().to_string();

        let entries = fs::read_dir(templates_dir).map_err(|_| EngineError::ConfigNotFound {
            path: dir_str.clone(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|_| EngineError::ConfigNotFound {
                path: dir_str.clone(),
            })?;
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(EngineError::ConfigNotFound {
                path: format!("{} (no template files found)", dir_str),
            });
        }
        paths.sort();
        Ok(paths)
    }

    fn rejected(path: &Path, error: EngineError) -> EngineError {
        EngineError::ConfigParseError {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }

    /// Returns the settings from `engine.yaml`.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the store holding the loaded records.
    pub fn store(&self) -> Arc<InMemoryStore> {
        Arc::clone(&self.store)
    }

    /// Builds an engine over the loaded store.
    pub fn engine(&self) -> PayrollEngine {
        PayrollEngine::new(self.store(), self.config.engine_settings())
    }

    /// Returns the payroll run limits.
    pub fn run_options(&self) -> RunOptions {
        self.config.run_options()
    }
}
