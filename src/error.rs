//! Error types for the payroll calculation engine.
//!
//! This module provides strongly-typed errors using the `thiserror` crate
//! for every failure that can occur while resolving a pay structure and
//! computing a paycheck.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PipelineStage;

/// The main error type for the payroll engine.
///
/// All fallible operations in the engine return this error type. Cap
/// overruns are deliberately absent: caps are clipped and recorded in
/// calculation metadata instead of failing.
///
/// # Example
///
/// ```
/// use payroll_engine::error::EngineError;
///
/// let error = EngineError::ConfigNotFound {
///     path: "/missing/file.yaml".to_string(),
/// };
/// assert_eq!(error.to_string(), "Configuration file not found: /missing/file.yaml");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Malformed or out-of-range input, such as negative income or a missing
    /// organization scope.
    #[error("Invalid value for '{field}': {message}")]
    Validation {
        /// The field or parameter that was invalid.
        field: String,
        /// A description of what made it invalid.
        message: String,
    },

    /// A required record does not exist for the requested scope and date.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// The kind of record that was looked up.
        entity: String,
        /// The lookup key, rendered for humans.
        key: String,
    },

    /// An authoring mistake surfaced at evaluation time (dependency cycle,
    /// overlapping brackets, reference to a missing component).
    #[error("Configuration error: {message}")]
    Configuration {
        /// A description of the problem.
        message: String,
        /// The component codes involved, if any.
        components: Vec<String>,
    },

    /// A formula could not be evaluated.
    #[error("Evaluation error in component '{component}': {message}")]
    Evaluation {
        /// The component being evaluated.
        component: String,
        /// A description of the failure.
        message: String,
    },

    /// Stored data violates an invariant that upstream constraints should
    /// have guaranteed.
    #[error("Integrity error: {message}")]
    Integrity {
        /// A description of the violated invariant.
        message: String,
    },

    /// A usage commit observed a value different from the snapshot it was
    /// computed against.
    #[error("Usage conflict on '{usage_key}': expected {expected}, found {actual}")]
    UsageConflict {
        /// The usage counter key.
        usage_key: String,
        /// The snapshot the paycheck was computed against.
        expected: Decimal,
        /// The value currently stored.
        actual: Decimal,
    },

    /// A computation exceeded its time budget.
    #[error("Computation timed out after {limit_ms}ms")]
    Timeout {
        /// The budget that was exceeded, in milliseconds.
        limit_ms: u64,
    },

    /// Configuration file was not found at the specified path.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration file '{path}': {message}")]
    ConfigParseError {
        /// The path to the file that failed to parse.
        path: String,
        /// A description of the parse error.
        message: String,
    },
}

/// A type alias for Results that return EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification of an [`EngineError`], used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input.
    Validation,
    /// Missing record.
    NotFound,
    /// Authoring/configuration mistake.
    Configuration,
    /// Formula evaluation failure.
    Evaluation,
    /// Violated storage invariant.
    Integrity,
    /// Concurrent usage update detected.
    UsageConflict,
    /// Time budget exceeded.
    Timeout,
}

impl EngineError {
    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Shorthand for a configuration error naming the given components.
    pub fn configuration<I, S>(message: impl Into<String>, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Configuration {
            message: message.into(),
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Shorthand for an evaluation error.
    pub fn evaluation(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Returns the coarse kind of this error.
    ///
    /// Configuration file problems are reported as configuration errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Configuration { .. }
            | Self::ConfigNotFound { .. }
            | Self::ConfigParseError { .. } => ErrorKind::Configuration,
            Self::Evaluation { .. } => ErrorKind::Evaluation,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::UsageConflict { .. } => ErrorKind::UsageConflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// A failed paycheck computation for one employee.
///
/// Carries the employee, the pipeline stage that failed and the component
/// being processed (when there was one), so audits can reproduce the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Paycheck for employee '{employee_id}' failed during {stage}{}: {source}", component_suffix(.component_code))]
pub struct ComputationError {
    /// The employee whose paycheck failed.
    pub employee_id: String,
    /// The component being processed, if the failure is component specific.
    pub component_code: Option<String>,
    /// The pipeline stage where the failure occurred.
    pub stage: PipelineStage,
    /// The originating error.
    #[source]
    pub source: EngineError,
}

fn component_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" (component '{}')", code),
        None => String::new(),
    }
}

impl ComputationError {
    /// Wraps an engine error with its pipeline context.
    ///
    /// When no component code is given, the code carried by evaluation and
    /// single-component configuration errors is used.
    pub fn new(
        employee_id: impl Into<String>,
        stage: PipelineStage,
        component_code: Option<String>,
        source: EngineError,
    ) -> Self {
        let component_code = component_code.or_else(|| match &source {
            EngineError::Evaluation { component, .. } => Some(component.clone()),
            EngineError::Configuration { components, .. } if components.len() == 1 => {
                components.first().cloned()
            }
            _ => None,
        });
        Self {
            employee_id: employee_id.into(),
            component_code,
            stage,
            source,
        }
    }

    /// Returns the kind of the originating error.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Returns true when the failure likely affects every employee on the
    /// same template and should be escalated to an operator.
    pub fn requires_operator_attention(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Integrity)
    }
}
