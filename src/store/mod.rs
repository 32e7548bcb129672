//! Read interfaces to the stores the engine depends on.
//!
//! The engine never talks to a database directly. It reads pay structures,
//! tax rules, allowance definitions and usage counters through these
//! traits, and every method takes the caller's [`OrganizationId`] so a
//! query can never cross tenants. [`InMemoryStore`] implements all four and
//! is what the HTTP binary and the tests use.

mod memory;

pub use memory::InMemoryStore;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::EngineResult;
use crate::models::{
    AllowanceDefinition, EmployeeId, Jurisdiction, OrganizationId, PayStructureTemplate,
    TaxRuleSet, TemplateRef, UsageKey, UsageUpdate, WorkerPayStructure,
};

/// Templates and worker assignments.
pub trait PayStructureStore: Send + Sync {
    /// Returns every pay structure row for the employee, overrides included.
    fn worker_structures(
        &self,
        organization_id: &OrganizationId,
        employee_id: &EmployeeId,
    ) -> EngineResult<Vec<WorkerPayStructure>>;

    /// Looks up one template version.
    ///
    /// Returns `None` if the organization has no such version.
    fn template(
        &self,
        organization_id: &OrganizationId,
        template: &TemplateRef,
    ) -> EngineResult<Option<PayStructureTemplate>>;
}

/// Tax rule sets.
pub trait TaxRuleStore: Send + Sync {
    /// Returns the rule sets of every tax type that apply to the
    /// jurisdiction on `date`: system-wide rules plus the organization's own.
    fn applicable_rule_sets(
        &self,
        organization_id: &OrganizationId,
        jurisdiction: &Jurisdiction,
        date: NaiveDate,
    ) -> EngineResult<Vec<TaxRuleSet>>;
}

/// Allowance definitions.
pub trait AllowanceStore: Send + Sync {
    /// Returns the allowance definitions that apply to the jurisdiction on
    /// `date`, system-wide and organization-scoped.
    fn applicable_allowances(
        &self,
        organization_id: &OrganizationId,
        jurisdiction: &Jurisdiction,
        date: NaiveDate,
    ) -> EngineResult<Vec<AllowanceDefinition>>;
}

/// Annual usage counters.
pub trait UsageStore: Send + Sync {
    /// Returns the amount used so far in `year`; zero when nothing is stored.
    fn get_usage(
        &self,
        organization_id: &OrganizationId,
        employee_id: &EmployeeId,
        usage_key: &UsageKey,
        year: i32,
    ) -> EngineResult<Decimal>;

    /// Applies a paycheck's usage updates atomically.
    ///
    /// Each update's `previous` must match the stored value; otherwise the
    /// whole commit is rejected with [`EngineError::UsageConflict`] and
    /// nothing is written.
    ///
    /// [`EngineError::UsageConflict`]: crate::error::EngineError::UsageConflict
    fn commit_usage(
        &self,
        organization_id: &OrganizationId,
        employee_id: &EmployeeId,
        updates: &[UsageUpdate],
    ) -> EngineResult<()>;
}
