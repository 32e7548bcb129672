//! Worker pay structure assignments and component overrides.
//!
//! This module defines [`WorkerPayStructure`], which binds an employee to a
//! template version over a date range, and the [`ComponentOverride`] rows
//! that replace individual component behaviour for that worker.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::effective::EffectiveRange;
use super::ids::{EmployeeId, OrganizationId};
use super::template::{FormulaVariable, TemplateRef};

/// Where a worker is taxed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jurisdiction {
    /// Country code.
    pub country: String,
    /// State or province code.
    #[serde(default)]
    pub state: Option<String>,
    /// City or county code.
    #[serde(default)]
    pub locality: Option<String>,
}

impl Jurisdiction {
    /// Returns true if a rule scoped to `country`, and optionally `state`
    /// and `locality`, covers this jurisdiction.
    pub fn is_within(&self, country: &str, state: Option<&str>, locality: Option<&str>) -> bool {
        self.country == country
            && state.is_none_or(|s| self.state.as_deref() == Some(s))
            && locality.is_none_or(|l| self.locality.as_deref() == Some(l))
    }
}

impl std::fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.country)?;
        if let Some(state) = &self.state {
            write!(f, "/{}", state)?;
        }
        if let Some(locality) = &self.locality {
            write!(f, "/{}", locality)?;
        }
        Ok(())
    }
}

/// Approval state of an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting approval; never applied.
    Pending,
    /// Approved and eligible to apply.
    Approved,
    /// Rejected; never applied.
    Rejected,
}

/// What an override does to its component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverrideAction {
    /// Replace the computed amount.
    Amount {
        /// The amount paid instead.
        amount: Decimal,
    },
    /// Replace a percentage component's rate.
    Percentage {
        /// The rate used instead.
        rate: Decimal,
    },
    /// Replace a formula component's expression.
    Formula {
        /// The expression used instead.
        expression: String,
        /// Component codes the expression reads.
        #[serde(default)]
        formula_variables: Vec<FormulaVariable>,
    },
    /// Pay a fixed component as an hourly rate times hours worked.
    Rate {
        /// The hourly rate.
        rate: Decimal,
    },
    /// Remove the component from evaluation.
    Disable,
}

impl OverrideAction {
    /// Returns the snake case name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Amount { .. } => "amount",
            Self::Percentage { .. } => "percentage",
            Self::Formula { .. } => "formula",
            Self::Rate { .. } => "rate",
            Self::Disable => "disable",
        }
    }
}

/// A worker-specific replacement of one component's behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentOverride {
    /// Override id.
    pub id: String,
    /// The component this override targets.
    pub component_code: String,
    /// The replacement behaviour.
    pub action: OverrideAction,
    /// Dates the override applies to.
    pub effective: EffectiveRange,
    /// Approval state.
    pub status: ApprovalStatus,
    /// When the override was approved.
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// Free-text justification kept for audit.
    #[serde(default)]
    pub reason: Option<String>,
}

impl ComponentOverride {
    /// Returns true if the override is approved and its range covers `date`.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.status == ApprovalStatus::Approved && self.effective.covers(date)
    }
}

/// Binds one employee to one template version over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPayStructure {
    /// Assignment id.
    pub id: String,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// The assigned employee.
    pub employee_id: EmployeeId,
    /// The bound template version.
    pub template: TemplateRef,
    /// Dates the assignment covers.
    pub effective: EffectiveRange,
    /// Marks the active assignment.
    #[serde(default)]
    pub is_current: bool,
    /// Tax jurisdiction of the worker.
    pub jurisdiction: Jurisdiction,
    /// Start of service, used for `tenure_years`.
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    /// Component overrides under this assignment.
    #[serde(default)]
    pub overrides: Vec<ComponentOverride>,
}

impl WorkerPayStructure {
    /// Completed years of service on `date`, or zero without a hire date.
    pub fn tenure_years(&self, date: NaiveDate) -> Decimal {
        let Some(hired) = self.hire_date else {
            return Decimal::ZERO;
        };
        if date < hired {
            return Decimal::ZERO;
        }
        let mut years = date.year() - hired.year();
        if (date.month(), date.day()) < (hired.month(), hired.day()) {
            years -= 1;
        }
        Decimal::from(years.max(0))
    }
}
