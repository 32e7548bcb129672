//! Pay structure resolution.
//!
//! Given an employee and a date, the resolver picks the worker's pay
//! structure row, loads the bound template version, selects the approved
//! override for each component, checks each override against the
//! component's permissions and calculation type, and orders the surviving
//! components by their dependencies. Everything that can be wrong with the
//! authored configuration is detected here, before any amount is computed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use super::evaluator::WellKnown;
use super::expression::Expression;
use super::ordering::{PlanNode, topological_order};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Bracket, CalculationType, ComponentCategory, ComponentOverride, EmployeeId, FormulaVariable,
    OrganizationId, OverrideAction, PayStructureComponent, PayStructureTemplate, PercentageBase,
    ResultSource, TemplateStatus, TierBasis, WorkerPayStructure,
};
use crate::store::PayStructureStore;

/// A component's calculation after any override has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveCalculation {
    /// A fixed amount, from the template or an amount override.
    Fixed {
        /// The amount per period.
        amount: Decimal,
    },
    /// An hourly rate override: `rate * hours_worked`.
    Hourly {
        /// The hourly rate.
        rate: Decimal,
    },
    /// `base * rate / 100`.
    Percentage {
        /// The percentage rate.
        rate: Decimal,
        /// What the rate applies to.
        base: PercentageBase,
    },
    /// A parsed formula.
    Formula {
        /// The parsed expression.
        expression: Expression,
        /// Component codes that read as zero when disabled.
        optional: BTreeSet<String>,
    },
    /// A progressive tier table.
    Tiered {
        /// The quantity the tiers slice.
        basis: TierBasis,
        /// The tier table.
        tiers: Vec<Bracket>,
    },
    /// Tax from the applicable rule sets.
    Tax {
        /// The tax type to look up.
        tax_type: String,
    },
}

impl EffectiveCalculation {
    /// The name reported in calculation metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::Hourly { .. } => "hourly",
            Self::Percentage { .. } => "percentage",
            Self::Formula { .. } => "formula",
            Self::Tiered { .. } => "tiered",
            Self::Tax { .. } => "tax",
        }
    }
}

/// One component ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedComponent {
    /// The template definition.
    pub definition: PayStructureComponent,
    /// The override applied to it, if any.
    pub override_row: Option<ComponentOverride>,
    /// The calculation to run.
    pub calculation: EffectiveCalculation,
    /// Components that are evaluated before this one.
    pub dependencies: BTreeSet<String>,
}

impl ResolvedComponent {
    /// The component code.
    pub fn code(&self) -> &str {
        &self.definition.code
    }

    /// Where the component's behaviour came from.
    pub fn source(&self) -> ResultSource {
        match &self.override_row {
            Some(row) => ResultSource::Override {
                override_id: row.id.clone(),
                action: row.action.name().to_string(),
            },
            None => ResultSource::TemplateDefault,
        }
    }
}

/// The outcome of resolution for one employee and date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStructure {
    /// The selected worker pay structure row.
    pub worker: WorkerPayStructure,
    /// The bound template version.
    pub template: PayStructureTemplate,
    /// Active components in evaluation order.
    pub components: Vec<ResolvedComponent>,
    /// Overrides that removed a component from evaluation.
    pub disabled: Vec<ComponentOverride>,
}

/// Resolves the pay structure that applies to an employee on `as_of`.
///
/// `today` decides which row wins when more than one covers the date: for
/// today-or-future dates the row marked current is preferred, for past dates
/// (or when no current row covers the date) the covering row with the
/// latest start wins.
///
/// # Errors
///
/// * [`EngineError::NotFound`] when no pay structure covers the date.
/// * [`EngineError::Integrity`] when the bound template version is missing
///   or a row belongs to another organization.
/// * [`EngineError::Configuration`] for draft templates, forbidden or
///   mismatched overrides, unparsable formulas, unknown references,
///   references to disabled components and dependency cycles.
pub fn get_effective_structure(
    store: &dyn PayStructureStore,
    organization_id: &OrganizationId,
    employee_id: &EmployeeId,
    as_of: NaiveDate,
    today: NaiveDate,
) -> EngineResult<ResolvedStructure> {
    let rows = store.worker_structures(organization_id, employee_id)?;
    if let Some(foreign) = rows.iter().find(|r| &r.organization_id != organization_id) {
        return Err(EngineError::integrity(format!(
            "pay structure '{}' belongs to organization {}, not {}",
            foreign.id, foreign.organization_id, organization_id
        )));
    }

    let worker = select_structure(&rows, as_of, today)
        .cloned()
        .ok_or_else(|| {
            EngineError::not_found("Worker pay structure", format!("{} on {}", employee_id, as_of))
        })?;

    let template = store
        .template(organization_id, &worker.template)?
        .ok_or_else(|| {
            EngineError::integrity(format!(
                "pay structure '{}' is bound to template {}, which does not exist",
                worker.id, worker.template
            ))
        })?;
    check_template(&template, as_of)?;

    let mut active = Vec::new();
    let mut disabled = Vec::new();
    check_override_targets(&worker, &template, as_of)?;
    for definition in &template.components {
        let override_row = select_override(&worker.overrides, &definition.code, as_of).cloned();
        match override_row {
            Some(row) if row.action == OverrideAction::Disable => {
                if !definition.override_permissions.allow_disable {
                    return Err(forbidden(&row, definition));
                }
                disabled.push(row);
            }
            override_row => {
                let calculation = compile(definition, override_row.as_ref())?;
                active.push(ResolvedComponent {
                    definition: definition.clone(),
                    override_row,
                    calculation,
                    dependencies: BTreeSet::new(),
                });
            }
        }
    }

    let components = plan(&template, active, &disabled)?;
    debug!(
        employee_id = %employee_id,
        organization_id = %organization_id,
        template = %template.template_ref(),
        components = components.len(),
        disabled = disabled.len(),
        "Pay structure resolved"
    );

    Ok(ResolvedStructure {
        worker,
        template,
        components,
        disabled,
    })
}

fn select_structure(
    rows: &[WorkerPayStructure],
    as_of: NaiveDate,
    today: NaiveDate,
) -> Option<&WorkerPayStructure> {
    let covering: Vec<&WorkerPayStructure> = rows.iter().filter(|r| r.effective.covers(as_of)).collect();
    if as_of >= today {
        if let Some(current) = covering.iter().copied().find(|r| r.is_current) {
            return Some(current);
        }
    }
    covering
        .into_iter()
        .max_by(|a, b| a.effective.cmp(&b.effective).then_with(|| a.id.cmp(&b.id)))
}

/// Most recently approved wins, then the later start, then the greater id.
fn select_override<'a>(
    overrides: &'a [ComponentOverride],
    code: &str,
    as_of: NaiveDate,
) -> Option<&'a ComponentOverride> {
    overrides
        .iter()
        .filter(|o| o.component_code == code && o.applies_on(as_of))
        .max_by(|a, b| {
            a.approved_at
                .cmp(&b.approved_at)
                .then_with(|| a.effective.from.cmp(&b.effective.from))
                .then_with(|| a.id.cmp(&b.id))
        })
}

fn check_template(template: &PayStructureTemplate, as_of: NaiveDate) -> EngineResult<()> {
    if template.status == TemplateStatus::Draft {
        return Err(EngineError::configuration(
            format!("template {} is still a draft", template.template_ref()),
            Vec::<String>::new(),
        ));
    }
    if !template.effective.covers(as_of) {
        return Err(EngineError::configuration(
            format!(
                "template {} is effective {}, which does not cover {}",
                template.template_ref(),
                template.effective,
                as_of
            ),
            Vec::<String>::new(),
        ));
    }
    template.validate()
}

fn check_override_targets(
    worker: &WorkerPayStructure,
    template: &PayStructureTemplate,
    as_of: NaiveDate,
) -> EngineResult<()> {
    for row in worker.overrides.iter().filter(|o| o.applies_on(as_of)) {
        if template.component(&row.component_code).is_none() {
            return Err(EngineError::configuration(
                format!(
                    "override '{}' targets component '{}', which template {} does not define",
                    row.id,
                    row.component_code,
                    template.template_ref()
                ),
                [row.component_code.clone()],
            ));
        }
    }
    Ok(())
}

fn forbidden(row: &ComponentOverride, definition: &PayStructureComponent) -> EngineError {
    EngineError::configuration(
        format!(
            "override '{}' ({}) is not permitted on component '{}'",
            row.id,
            row.action.name(),
            definition.code
        ),
        [definition.code.clone()],
    )
}

fn parse_formula(
    code: &str,
    source: &str,
    variables: &[FormulaVariable],
) -> EngineResult<EffectiveCalculation> {
    let expression = Expression::parse(source).map_err(|e| {
        EngineError::configuration(
            format!("formula for component '{}' does not parse: {}", code, e),
            [code.to_string()],
        )
    })?;
    let optional = variables
        .iter()
        .filter(|v| v.optional)
        .map(|v| v.name.clone())
        .collect();
    Ok(EffectiveCalculation::Formula { expression, optional })
}

fn compile(
    definition: &PayStructureComponent,
    override_row: Option<&ComponentOverride>,
) -> EngineResult<EffectiveCalculation> {
    let code = definition.code.as_str();
    let Some(row) = override_row else {
        return Ok(match &definition.calculation {
            CalculationType::Fixed { amount } => EffectiveCalculation::Fixed { amount: *amount },
            CalculationType::Percentage { rate, percentage_of } => EffectiveCalculation::Percentage {
                rate: *rate,
                base: percentage_of.clone(),
            },
            CalculationType::Formula {
                expression,
                formula_variables,
            } => parse_formula(code, expression, formula_variables)?,
            CalculationType::Tiered { basis, tiers } => EffectiveCalculation::Tiered {
                basis: basis.clone(),
                tiers: tiers.clone(),
            },
            CalculationType::Tax { tax_type } => EffectiveCalculation::Tax {
                tax_type: tax_type.clone(),
            },
        });
    };

    let permissions = definition.override_permissions;
    let permitted = match row.action {
        OverrideAction::Amount { .. } | OverrideAction::Percentage { .. } | OverrideAction::Rate { .. } => {
            permissions.allow_amount
        }
        OverrideAction::Formula { .. } => permissions.allow_formula,
        OverrideAction::Disable => permissions.allow_disable,
    };
    if !permitted {
        return Err(forbidden(row, definition));
    }

    let mismatch = || {
        EngineError::configuration(
            format!(
                "override '{}' ({}) does not fit {} component '{}'",
                row.id,
                row.action.name(),
                definition.calculation.name(),
                code
            ),
            [code.to_string()],
        )
    };

    match (&row.action, &definition.calculation) {
        (OverrideAction::Amount { .. }, CalculationType::Tax { .. }) => Err(mismatch()),
        (OverrideAction::Amount { amount }, _) => Ok(EffectiveCalculation::Fixed { amount: *amount }),
        (OverrideAction::Percentage { rate }, CalculationType::Percentage { percentage_of, .. }) => {
            Ok(EffectiveCalculation::Percentage {
                rate: *rate,
                base: percentage_of.clone(),
            })
        }
        (
            OverrideAction::Formula {
                expression,
                formula_variables,
            },
            CalculationType::Formula { .. },
        ) => parse_formula(code, expression, formula_variables),
        (OverrideAction::Rate { rate }, CalculationType::Fixed { .. }) => {
            Ok(EffectiveCalculation::Hourly { rate: *rate })
        }
        _ => Err(mismatch()),
    }
}

fn category_name(category: ComponentCategory) -> &'static str {
    match category {
        ComponentCategory::Earning => "earning",
        ComponentCategory::Deduction => "deduction",
        ComponentCategory::Tax => "tax",
    }
}

#[derive(Debug)]
enum Reference {
    Declared(String),
    AllEarnings,
}

fn references(component: &ResolvedComponent) -> EngineResult<Vec<Reference>> {
    let mut refs: Vec<Reference> = component
        .definition
        .depends_on_components
        .iter()
        .cloned()
        .map(Reference::Declared)
        .collect();

    match &component.calculation {
        EffectiveCalculation::Formula { expression, optional } => {
            for name in expression.variables() {
                match WellKnown::lookup(&name) {
                    Some(WellKnown::GrossPay) => refs.push(Reference::AllEarnings),
                    Some(WellKnown::TaxableIncome) => require_tax_category(component)?,
                    Some(_) => {}
                    None => refs.push(Reference::Declared(name)),
                }
            }
            refs.extend(optional.iter().cloned().map(Reference::Declared));
        }
        EffectiveCalculation::Percentage { base, .. } => match base {
            PercentageBase::Component(other) => refs.push(Reference::Declared(other.clone())),
            PercentageBase::GrossPay => refs.push(Reference::AllEarnings),
            PercentageBase::TaxableIncome => require_tax_category(component)?,
            PercentageBase::BaseSalary => {}
        },
        EffectiveCalculation::Tiered { basis, .. } => match basis {
            TierBasis::Component(other) => refs.push(Reference::Declared(other.clone())),
            TierBasis::GrossPay => refs.push(Reference::AllEarnings),
            TierBasis::BaseSalary | TierBasis::HoursWorked | TierBasis::TenureYears => {}
        },
        EffectiveCalculation::Fixed { .. }
        | EffectiveCalculation::Hourly { .. }
        | EffectiveCalculation::Tax { .. } => {}
    }
    Ok(refs)
}

/// `taxable_income` exists only once the tax stage starts.
fn require_tax_category(component: &ResolvedComponent) -> EngineResult<()> {
    if component.definition.category == ComponentCategory::Tax {
        return Ok(());
    }
    let code = component.code();
    Err(EngineError::configuration(
        format!(
            "component '{}' reads taxable_income, which is only available to tax components",
            code
        ),
        [code.to_string()],
    ))
}

fn plan(
    template: &PayStructureTemplate,
    mut active: Vec<ResolvedComponent>,
    disabled: &[ComponentOverride],
) -> EngineResult<Vec<ResolvedComponent>> {
    let disabled_by: BTreeMap<&str, &str> = disabled
        .iter()
        .map(|o| (o.component_code.as_str(), o.id.as_str()))
        .collect();
    let earnings: Vec<String> = active
        .iter()
        .filter(|c| c.definition.category == ComponentCategory::Earning)
        .map(|c| c.definition.code.clone())
        .collect();

    for component in &mut active {
        let code = component.definition.code.clone();
        let category = component.definition.category;
        let optional = match &component.calculation {
            EffectiveCalculation::Formula { optional, .. } => optional.clone(),
            _ => BTreeSet::new(),
        };

        let mut dependencies = BTreeSet::new();
        for reference in references(component)? {
            let name = match reference {
                Reference::AllEarnings => {
                    dependencies.extend(earnings.iter().filter(|e| **e != code).cloned());
                    continue;
                }
                Reference::Declared(name) => name,
            };

            let Some(target) = template.component(&name) else {
                return Err(EngineError::configuration(
                    format!(
                        "component '{}' references '{}', which is neither a component nor a known variable",
                        code, name
                    ),
                    [code.clone()],
                ));
            };
            if let Some(override_id) = disabled_by.get(name.as_str()) {
                if optional.contains(&name) {
                    continue;
                }
                return Err(EngineError::configuration(
                    format!(
                        "component '{}' depends on '{}', which override '{}' disables",
                        code, name, override_id
                    ),
                    [code.clone(), name.clone()],
                ));
            }
            if target.category == ComponentCategory::Tax && category != ComponentCategory::Tax {
                return Err(EngineError::configuration(
                    format!(
                        "{} component '{}' cannot depend on tax component '{}'",
                        category_name(category),
                        code,
                        name
                    ),
                    [code.clone(), name.clone()],
                ));
            }
            dependencies.insert(name);
        }
        component.dependencies = dependencies;
    }

    let nodes: Vec<PlanNode> = active
        .iter()
        .map(|c| PlanNode {
            code: c.definition.code.clone(),
            sequence_order: c.definition.sequence_order,
            dependencies: c.dependencies.clone(),
        })
        .collect();
    let order = topological_order(&nodes)?;

    let mut slots: Vec<Option<ResolvedComponent>> = active.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect())
}
