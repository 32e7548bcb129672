//! Per-component evaluation.
//!
//! [`evaluate_component`] computes the raw amount of one resolved component
//! from the period inputs and the results of components evaluated before it.
//! Amounts come back unrounded; bounds, caps and rounding are applied by the
//! engine once the raw amount is known.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::expression::Value;
use super::resolver::{EffectiveCalculation, ResolvedComponent};
use super::tax::{calculate_bracket_tax, calculate_flat_rate_tax, progressive_amount};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AmountOverflow, CalculationMetadata, ComponentCategory, Jurisdiction, JurisdictionLevel, OrganizationId,
    PercentageBase, TaxMethod, TaxRuleSet, TierBasis, add_money, percent_of,
};

/// Variables every formula can read without declaring them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnown {
    /// The period's base salary.
    BaseSalary,
    /// Hours worked in the period.
    HoursWorked,
    /// The worker's hourly rate.
    HourlyRate,
    /// Completed years of service.
    TenureYears,
    /// Earnings evaluated so far.
    GrossSoFar,
    /// All earnings; implies a dependency on every other earning.
    GrossPay,
    /// Taxable income, in tax components only.
    TaxableIncome,
}

impl WellKnown {
    /// Maps a formula identifier to a well-known variable.
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "base_salary" | "baseSalary" => Some(Self::BaseSalary),
            "hours_worked" | "hoursWorked" => Some(Self::HoursWorked),
            "hourly_rate" | "hourlyRate" => Some(Self::HourlyRate),
            "tenure_years" | "tenureYears" => Some(Self::TenureYears),
            "gross_so_far" | "grossSoFar" => Some(Self::GrossSoFar),
            "gross_pay" | "grossPay" => Some(Self::GrossPay),
            "taxable_income" | "taxableIncome" => Some(Self::TaxableIncome),
            _ => None,
        }
    }
}

/// Period inputs with defaults filled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodValues {
    /// Base salary for the period.
    pub base_salary: Decimal,
    /// Hours worked in the period.
    pub hours_worked: Decimal,
    /// Hourly rate; zero when not paid by the hour.
    pub hourly_rate: Decimal,
    /// Completed years of service.
    pub tenure_years: Decimal,
}

/// Everything a component can read while it is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// The tenant being computed.
    pub organization_id: &'a OrganizationId,
    /// The worker's tax jurisdiction.
    pub jurisdiction: &'a Jurisdiction,
    /// The evaluation date.
    pub as_of: NaiveDate,
    /// Period inputs.
    pub period: &'a PeriodValues,
    /// Results of components evaluated so far, by code.
    pub results: &'a BTreeMap<String, Decimal>,
    /// Sum of earnings evaluated so far.
    pub gross_so_far: Decimal,
    /// Taxable income, once the tax stage has computed it.
    pub taxable_income: Option<Decimal>,
    /// Tax rule sets applicable to the jurisdiction on the evaluation date.
    pub tax_rules: &'a [TaxRuleSet],
}

impl EvaluationContext<'_> {
    fn well_known(&self, variable: WellKnown) -> Option<Decimal> {
        match variable {
            WellKnown::BaseSalary => Some(self.period.base_salary),
            WellKnown::HoursWorked => Some(self.period.hours_worked),
            WellKnown::HourlyRate => Some(self.period.hourly_rate),
            WellKnown::TenureYears => Some(self.period.tenure_years),
            WellKnown::GrossSoFar | WellKnown::GrossPay => Some(self.gross_so_far),
            WellKnown::TaxableIncome => self.taxable_income,
        }
    }

    fn component(&self, code: &str, reader: &str) -> EngineResult<Decimal> {
        self.results.get(code).copied().ok_or_else(|| {
            EngineError::evaluation(
                reader,
                format!("'{}' has not been evaluated yet", code),
            )
        })
    }

    fn taxable_income_for(&self, reader: &str) -> EngineResult<Decimal> {
        self.taxable_income.ok_or_else(|| {
            EngineError::evaluation(reader, "taxable income is not available before the tax stage")
        })
    }
}

/// The raw result of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentValue {
    /// The unrounded amount.
    pub amount: Decimal,
    /// How it was computed.
    pub metadata: CalculationMetadata,
    /// Each rule set's share, for tax components. `amount` is their sum.
    pub tax_portions: Vec<TaxPortion>,
}

impl ComponentValue {
    fn new(amount: Decimal, metadata: CalculationMetadata) -> Self {
        Self {
            amount,
            metadata,
            tax_portions: Vec::new(),
        }
    }
}

/// One rule set's contribution to a tax component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxPortion {
    /// The rule set.
    pub rule_set_id: String,
    /// Its tax, rounded, before any annual cap.
    pub amount: Decimal,
    /// The rule set's own annual cap.
    pub annual_cap: Option<Decimal>,
}

/// Computes a component's raw amount.
///
/// # Errors
///
/// * [`EngineError::Evaluation`] for formula failures (undefined variable,
///   division by zero, overflow, a boolean result), for bases that have not
///   been evaluated, for amounts out of range, and for deductions or taxes
///   that come out negative.
/// * [`EngineError::NotFound`] when a tax component has no applicable rule
///   set.
/// * [`EngineError::Configuration`] when two rule sets of the same tax type
///   and scope apply at one jurisdiction level.
pub fn evaluate_component(
    component: &ResolvedComponent,
    ctx: &EvaluationContext<'_>,
) -> EngineResult<ComponentValue> {
    let code = component.code();
    let mut metadata = CalculationMetadata::new(component.calculation.name());

    let value = match &component.calculation {
        EffectiveCalculation::Fixed { amount } => ComponentValue::new(*amount, metadata),
        EffectiveCalculation::Hourly { rate } => {
            metadata.base = Some(ctx.period.hours_worked);
            metadata.rate = Some(*rate);
            let amount = rate
                .checked_mul(ctx.period.hours_worked)
                .ok_or_else(|| AmountOverflow.in_component(code))?;
            ComponentValue::new(amount, metadata)
        }
        EffectiveCalculation::Percentage { rate, base } => {
            let base_amount = match base {
                PercentageBase::GrossPay => ctx.gross_so_far,
                PercentageBase::BaseSalary => ctx.period.base_salary,
                PercentageBase::TaxableIncome => ctx.taxable_income_for(code)?,
                PercentageBase::Component(other) => ctx.component(other, code)?,
            };
            metadata.base = Some(base_amount);
            metadata.rate = Some(*rate);
            let amount = percent_of(base_amount, *rate).map_err(|e| e.in_component(code))?;
            ComponentValue::new(amount, metadata)
        }
        EffectiveCalculation::Formula { expression, optional } => {
            let result = expression
                .evaluate_with(|name| match WellKnown::lookup(name) {
                    Some(variable) => ctx.well_known(variable).map(Value::Number),
                    None => ctx
                        .results
                        .get(name)
                        .copied()
                        .or_else(|| optional.contains(name).then_some(Decimal::ZERO))
                        .map(Value::Number),
                })
                .and_then(|value| value.as_number())
                .map_err(|e| EngineError::evaluation(code, e.to_string()))?;
            metadata.expression = Some(expression.source().to_string());
            ComponentValue::new(result, metadata)
        }
        EffectiveCalculation::Tiered { basis, tiers } => {
            let basis_value = match basis {
                TierBasis::GrossPay => ctx.gross_so_far,
                TierBasis::BaseSalary => ctx.period.base_salary,
                TierBasis::HoursWorked => ctx.period.hours_worked,
                TierBasis::TenureYears => ctx.period.tenure_years,
                TierBasis::Component(other) => ctx.component(other, code)?,
            };
            let result = progressive_amount(basis_value, tiers).map_err(|e| e.in_component(code))?;
            metadata.base = Some(basis_value);
            metadata.brackets = result.slices;
            ComponentValue::new(result.amount, metadata)
        }
        EffectiveCalculation::Tax { tax_type } => evaluate_tax(code, tax_type, ctx, metadata)?,
    };

    if component.definition.category != ComponentCategory::Earning && value.amount < Decimal::ZERO {
        return Err(EngineError::evaluation(
            code,
            format!("evaluated to a negative amount {}", value.amount),
        ));
    }
    Ok(value)
}

/// Picks one rule set per jurisdiction level. An organization's own rule
/// set replaces the system-wide one at the same level.
fn select_rule_sets<'a>(
    code: &str,
    tax_type: &str,
    ctx: &EvaluationContext<'a>,
) -> EngineResult<Vec<&'a TaxRuleSet>> {
    let mut by_level: BTreeMap<JurisdictionLevel, (Vec<&'a TaxRuleSet>, Vec<&'a TaxRuleSet>)> =
        BTreeMap::new();
    for rule_set in ctx.tax_rules.iter().filter(|r| {
        r.tax_type == tax_type
            && r.applies_to(ctx.jurisdiction, ctx.as_of)
            && r.organization_id.as_ref().is_none_or(|o| o == ctx.organization_id)
    }) {
        let (own, system) = by_level.entry(rule_set.level()).or_default();
        match rule_set.organization_id {
            Some(_) => own.push(rule_set),
            None => system.push(rule_set),
        }
    }

    let mut selected = Vec::new();
    for (level, (own, system)) in by_level {
        let candidates = if own.is_empty() { system } else { own };
        match candidates.as_slice() {
            [single] => selected.push(*single),
            [first, second, ..] => {
                return Err(EngineError::configuration(
                    format!(
                        "tax rule sets '{}' and '{}' both apply to tax type '{}' at the {:?} level",
                        first.id, second.id, tax_type, level
                    ),
                    [code.to_string()],
                ));
            }
            [] => {}
        }
    }
    Ok(selected)
}

fn evaluate_tax(
    code: &str,
    tax_type: &str,
    ctx: &EvaluationContext<'_>,
    mut metadata: CalculationMetadata,
) -> EngineResult<ComponentValue> {
    let income = ctx.taxable_income_for(code)?;
    let rule_sets = select_rule_sets(code, tax_type, ctx)?;
    if rule_sets.is_empty() {
        return Err(EngineError::not_found(
            "Tax rule set",
            format!("{} for {} on {}", tax_type, ctx.jurisdiction, ctx.as_of),
        ));
    }

    let in_component = |e: EngineError| EngineError::evaluation(code, e.to_string());
    let mut total = Decimal::ZERO;
    let mut portions = Vec::with_capacity(rule_sets.len());
    for rule_set in rule_sets {
        let amount = match &rule_set.method {
            TaxMethod::Bracket { brackets } => {
                let result = calculate_bracket_tax(income, brackets).map_err(in_component)?;
                metadata.brackets.extend(result.slices);
                result.amount
            }
            TaxMethod::Flat { rate_percentage } => {
                metadata.rate = Some(*rate_percentage);
                calculate_flat_rate_tax(income, *rate_percentage, None)
                    .map_err(in_component)?
                    .amount
            }
        };
        total = add_money(total, amount).map_err(|e| e.in_component(code))?;
        metadata.rule_sets.push(rule_set.id.clone());
        portions.push(TaxPortion {
            rule_set_id: rule_set.id.clone(),
            amount,
            annual_cap: rule_set.annual_cap,
        });
    }

    metadata.base = Some(income);
    Ok(ComponentValue {
        amount: total,
        metadata,
        tax_portions: portions,
    })
}
