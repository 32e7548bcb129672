//! In-memory implementation of every store trait.
//!
//! Write methods enforce the invariants a relational store would enforce
//! with constraints: no overlapping worker assignments per employee, at most
//! one current assignment, at most one organization default template on any
//! date, and valid bracket tables. Reads clone out of a `RwLock` that is
//! never held across an `.await`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use super::{AllowanceStore, PayStructureStore, TaxRuleStore, UsageStore};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AllowanceDefinition, EmployeeAllowanceUsage, EmployeeId, Jurisdiction, OrganizationId,
    PayStructureTemplate, TaxRuleSet, TemplateRef, UsageKey, UsageUpdate, WorkerPayStructure,
    ensure_no_overlap,
};

type UsageRow = (OrganizationId, EmployeeId, UsageKey, i32);

#[derive(Debug, Default)]
struct Tables {
    templates: HashMap<OrganizationId, Vec<PayStructureTemplate>>,
    workers: HashMap<(OrganizationId, EmployeeId), Vec<WorkerPayStructure>>,
    tax_rules: Vec<TaxRuleSet>,
    allowances: Vec<AllowanceDefinition>,
    usage: HashMap<UsageRow, Decimal>,
}

/// Thread-safe store holding every table in memory.
///
/// # Example
///
/// ```
/// use payroll_engine::models::{EmployeeId, OrganizationId, UsageKey};
/// use payroll_engine::store::{InMemoryStore, UsageStore};
/// use rust_decimal::Decimal;
///
/// let store = InMemoryStore::new();
/// let org = OrganizationId::parse("org_acme").unwrap();
/// let employee = EmployeeId::parse("emp_001").unwrap();
/// let key = UsageKey::Component("pension".to_string());
///
/// assert_eq!(store.get_usage(&org, &employee, &key, 2026).unwrap(), Decimal::ZERO);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| EngineError::integrity("store lock poisoned"))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| EngineError::integrity("store lock poisoned"))
    }

    /// Adds a template version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for an invalid template, and
    /// [`EngineError::Integrity`] if the version already exists or a second
    /// organization default would be effective on the same date.
    pub fn insert_template(&self, template: PayStructureTemplate) -> EngineResult<()> {
        template.validate()?;
        if template.effective.is_inverted() {
            return Err(EngineError::integrity(format!(
                "template {} has an inverted effective range",
                template.template_ref()
            )));
        }

        let mut tables = self.write()?;
        let versions = tables
            .templates
            .entry(template.organization_id.clone())
            .or_default();

        if versions
            .iter()
            .any(|t| t.template_code == template.template_code && t.version == template.version)
        {
            return Err(EngineError::integrity(format!(
                "template {} already exists for organization {}",
                template.template_ref(),
                template.organization_id
            )));
        }
        if template.is_organization_default {
            let defaults = versions
                .iter()
                .filter(|t| t.is_organization_default)
                .map(|t| &t.effective)
                .chain(std::iter::once(&template.effective));
            ensure_no_overlap(
                &format!("organization {} default templates", template.organization_id),
                defaults,
            )?;
        }

        debug!(
            organization_id = %template.organization_id,
            template = %template.template_ref(),
            "Template stored"
        );
        versions.push(template);
        Ok(())
    }

    /// Adds a worker pay structure row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Integrity`] if the row's range overlaps another
    /// row for the same employee, if a second row is marked current, or if
    /// two overrides share an id.
    pub fn insert_worker_structure(&self, structure: WorkerPayStructure) -> EngineResult<()> {
        let mut seen = std::collections::HashSet::new();
        for override_row in &structure.overrides {
            if !seen.insert(override_row.id.as_str()) {
                return Err(EngineError::integrity(format!(
                    "worker structure '{}' has duplicate override id '{}'",
                    structure.id, override_row.id
                )));
            }
            if override_row.effective.is_inverted() {
                return Err(EngineError::integrity(format!(
                    "override '{}' has an inverted effective range",
                    override_row.id
                )));
            }
        }

        let mut tables = self.write()?;
        let key = (
            structure.organization_id.clone(),
            structure.employee_id.clone(),
        );
        let rows = tables.workers.entry(key).or_default();

        let label = format!("employee {} pay structures", structure.employee_id);
        ensure_no_overlap(
            &label,
            rows.iter()
                .map(|r| &r.effective)
                .chain(std::iter::once(&structure.effective)),
        )?;
        if structure.is_current && rows.iter().any(|r| r.is_current) {
            return Err(EngineError::integrity(format!(
                "employee {} already has a current pay structure",
                structure.employee_id
            )));
        }

        rows.push(structure);
        Ok(())
    }

    /// Adds a tax rule set.
    pub fn insert_tax_rule_set(&self, rule_set: TaxRuleSet) -> EngineResult<()> {
        rule_set.validate()?;
        let mut tables = self.write()?;
        if tables.tax_rules.iter().any(|r| r.id == rule_set.id) {
            return Err(EngineError::integrity(format!(
                "tax rule set '{}' already exists",
                rule_set.id
            )));
        }
        tables.tax_rules.push(rule_set);
        Ok(())
    }

    /// Adds an allowance definition.
    pub fn insert_allowance(&self, allowance: AllowanceDefinition) -> EngineResult<()> {
        let mut tables = self.write()?;
        if tables.allowances.iter().any(|a| a.id == allowance.id) {
            return Err(EngineError::integrity(format!(
                "allowance '{}' already exists",
                allowance.id
            )));
        }
        tables.allowances.push(allowance);
        Ok(())
    }

    /// Sets an opening usage balance, replacing any stored value.
    pub fn set_usage(&self, usage: EmployeeAllowanceUsage) -> EngineResult<()> {
        usage.validate()?;
        let mut tables = self.write()?;
        tables.usage.insert(
            (
                usage.organization_id,
                usage.employee_id,
                usage.usage_key,
                usage.year,
            ),
            usage.amount_used,
        );
        Ok(())
    }
}

impl PayStructureStore for InMemoryStore {
    fn worker_structures(
        &self,
        organization_id: &OrganizationId,
        employee_id: &EmployeeId,
    ) -> EngineResult<Vec<WorkerPayStructure>> {
        let tables = self.read()?;
        Ok(tables
            .workers
            .get(&(organization_id.clone(), employee_id.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn template(
        &self,
        organization_id: &OrganizationId,
        template: &TemplateRef,
    ) -> EngineResult<Option<PayStructureTemplate>> {
        let tables = self.read()?;
        Ok(tables.templates.get(organization_id).and_then(|versions| {
            versions
                .iter()
                .find(|t| t.template_code == template.template_code && t.version == template.version)
                .cloned()
        }))
    }
}

fn visible_to(owner: Option<&OrganizationId>, organization_id: &OrganizationId) -> bool {
    owner.is_none_or(|owner| owner == organization_id)
}

impl TaxRuleStore for InMemoryStore {
    fn applicable_rule_sets(
        &self,
        organization_id: &OrganizationId,
        jurisdiction: &Jurisdiction,
        date: NaiveDate,
    ) -> EngineResult<Vec<TaxRuleSet>> {
        let tables = self.read()?;
        Ok(tables
            .tax_rules
            .iter()
            .filter(|r| visible_to(r.organization_id.as_ref(), organization_id))
            .filter(|r| r.applies_to(jurisdiction, date))
            .cloned()
            .collect())
    }
}

impl AllowanceStore for InMemoryStore {
    fn applicable_allowances(
        &self,
        organization_id: &OrganizationId,
        jurisdiction: &Jurisdiction,
        date: NaiveDate,
    ) -> EngineResult<Vec<AllowanceDefinition>> {
        let tables = self.read()?;
        Ok(tables
            .allowances
            .iter()
            .filter(|a| visible_to(a.organization_id.as_ref(), organization_id))
            .filter(|a| a.applies_to(jurisdiction, date))
            .cloned()
            .collect())
    }
}

impl UsageStore for InMemoryStore {
    fn get_usage(
        &self,
        organization_id: &OrganizationId,
        employee_id: &EmployeeId,
        usage_key: &UsageKey,
        year: i32,
    ) -> EngineResult<Decimal> {
        let tables = self.read()?;
        let row = (
            organization_id.clone(),
            employee_id.clone(),
            usage_key.clone(),
            year,
        );
        Ok(tables.usage.get(&row).copied().unwrap_or(Decimal::ZERO))
    }

    fn commit_usage(
        &self,
        organization_id: &OrganizationId,
        employee_id: &EmployeeId,
        updates: &[UsageUpdate],
    ) -> EngineResult<()> {
        let mut tables = self.write()?;
        let row = |update: &UsageUpdate| {
            (
                organization_id.clone(),
                employee_id.clone(),
                update.usage_key.clone(),
                update.year,
            )
        };

        for update in updates {
            let actual = tables.usage.get(&row(update)).copied().unwrap_or(Decimal::ZERO);
            if actual != update.previous {
                return Err(EngineError::UsageConflict {
                    usage_key: update.usage_key.to_string(),
                    expected: update.previous,
                    actual,
                });
            }
            if update.new < update.previous {
                return Err(EngineError::validation(
                    "usage",
                    format!(
                        "update for '{}' would decrease usage from {} to {}",
                        update.usage_key, update.previous, update.new
                    ),
                ));
            }
        }

        for update in updates {
            tables.usage.insert(row(update), update.new);
        }
        debug!(
            organization_id = %organization_id,
            employee_id = %employee_id,
            updates = updates.len(),
            "Usage committed"
        );
        Ok(())
    }
}
