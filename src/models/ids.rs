//! Tenant and employee identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// The organization (tenant) that scopes every store query.
///
/// Construct through [`OrganizationId::parse`] at trust boundaries so an
/// empty scope is rejected before any data is read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    /// Validates and wraps an organization id.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::models::OrganizationId;
    ///
    /// assert!(OrganizationId::parse("org_acme").is_ok());
    /// assert!(OrganizationId::parse("  ").is_err());
    /// ```
    pub fn parse(value: impl Into<String>) -> EngineResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EngineError::validation(
                "organization_id",
                "organization scope is required",
            ));
        }
        Ok(Self(value))
    }

    /// Returns the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An employee identifier, unique within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(String);

impl EmployeeId {
    /// Validates and wraps an employee id.
    pub fn parse(value: impl Into<String>) -> EngineResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EngineError::validation("employee_id", "employee id is required"));
        }
        Ok(Self(value))
    }

    /// Returns the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
