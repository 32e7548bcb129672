//! Single-employee paycheck computation.
//!
//! [`PayrollEngine::compute_paycheck`] runs the strict pipeline
//! `Resolving -> Evaluating -> TaxApplying -> DeductionApplying -> Aggregated`
//! for one employee. Each stage depends on the previous stage's results, so
//! the pipeline is synchronous; concurrency happens across employees in
//! [`crate::run`].
//!
//! The engine only reads from its stores. Annual usage increments travel on
//! the returned [`PaycheckResult`] and are written by
//! [`PayrollEngine::commit_usage`] once the caller decides to keep the
//! paycheck.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::calculation::{
    EffectiveCalculation, EvaluationContext, PeriodValues, ResolvedComponent, UsageLedger,
    aggregate_components, apply_deduction, apply_earning_bounds, evaluate_component,
    get_effective_structure, split_taxable_earning,
};
use crate::error::{ComputationError, EngineError, EngineResult};
use crate::models::{
    AllowanceDefinition, CalculationMetadata, ClipReason, ComponentCategory, DeductionTiming,
    EmployeeId, EvaluatedComponentResult, OrganizationId, PayPeriod, PaycheckResult,
    PaycheckState, PeriodInputs, PipelineStage, TemplateRef, UsageKey, add_money, round_money,
};
use crate::store::{AllowanceStore, PayStructureStore, TaxRuleStore, UsageStore};

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Fixed "today" for resolution; `None` uses the UTC wall clock.
    pub reference_date: Option<NaiveDate>,
}

impl EngineSettings {
    /// The date the resolver treats as today.
    pub fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Input for one employee's paycheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaycheckRequest {
    /// The tenant; required and non-blank.
    pub organization_id: String,
    /// The employee.
    pub employee_id: String,
    /// The pay period; its end date is the evaluation date.
    pub pay_period: PayPeriod,
    /// Period inputs for formulas.
    #[serde(default)]
    pub inputs: PeriodInputs,
}

/// Computes paychecks against a set of stores.
///
/// Cheap to clone; clones share the stores.
#[derive(Clone)]
pub struct PayrollEngine {
    structures: Arc<dyn PayStructureStore>,
    tax_rules: Arc<dyn TaxRuleStore>,
    allowances: Arc<dyn AllowanceStore>,
    usage: Arc<dyn UsageStore>,
    settings: EngineSettings,
}

impl std::fmt::Debug for PayrollEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayrollEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Tracks where the pipeline is, for lifecycle reporting and error context.
struct Progress {
    employee_label: String,
    lifecycle: Vec<PaycheckState>,
    stage: PipelineStage,
    component: Option<String>,
    template: Option<TemplateRef>,
}

impl Progress {
    fn new(employee_label: String) -> Self {
        Self {
            employee_label,
            lifecycle: vec![PaycheckState::Pending],
            stage: PipelineStage::Resolving,
            component: None,
            template: None,
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.component = None;
        let next = PaycheckState::from(stage);
        if self
            .lifecycle
            .last()
            .is_some_and(|state| state.can_transition_to(next))
        {
            self.lifecycle.push(next);
        }
    }

    fn fail(mut self, source: EngineError) -> ComputationError {
        self.lifecycle.push(PaycheckState::Failed);
        ComputationError::new(self.employee_label, self.stage, self.component, source)
    }
}

/// A deduction awaiting application, carried from evaluation to the stage
/// that applies it.
struct PendingDeduction<'a> {
    component: &'a ResolvedComponent,
    configured: Decimal,
    metadata: CalculationMetadata,
}

impl PayrollEngine {
    /// Creates an engine reading every table from one store.
    pub fn new<S>(store: Arc<S>, settings: EngineSettings) -> Self
    where
        S: PayStructureStore + TaxRuleStore + AllowanceStore + UsageStore + 'static,
    {
        Self {
            structures: store.clone(),
            tax_rules: store.clone(),
            allowances: store.clone(),
            usage: store,
            settings,
        }
    }

    /// The engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Computes one employee's paycheck.
    ///
    /// Nothing is written. On failure the error carries the employee, the
    /// stage and (when applicable) the component that failed; configuration
    /// and integrity failures are also logged as operator alerts.
    pub fn compute_paycheck(&self, request: &PaycheckRequest) -> Result<PaycheckResult, ComputationError> {
        let started = Instant::now();
        let mut progress = Progress::new(request.employee_id.clone());
        progress.enter(PipelineStage::Resolving);

        match self.run_pipeline(request, &mut progress, started) {
            Ok(result) => {
                info!(
                    organization_id = %result.organization_id,
                    employee_id = %result.employee_id,
                    template = %result.template,
                    net_pay = %result.components.summary.net_pay,
                    duration_us = result.audit_trace.duration_us,
                    "Paycheck computed"
                );
                Ok(result)
            }
            Err(source) => {
                let template = progress.template.as_ref().map(ToString::to_string);
                let error = progress.fail(source);
                if error.requires_operator_attention() {
                    error!(
                        organization_id = %request.organization_id,
                        employee_id = %error.employee_id,
                        stage = %error.stage,
                        component = ?error.component_code,
                        template = ?template,
                        error = %error.source,
                        "Operator attention required: paycheck configuration is broken"
                    );
                } else {
                    warn!(
                        organization_id = %request.organization_id,
                        employee_id = %error.employee_id,
                        stage = %error.stage,
                        component = ?error.component_code,
                        error = %error.source,
                        "Paycheck failed"
                    );
                }
                Err(error)
            }
        }
    }

    /// Writes a computed paycheck's usage updates.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UsageConflict`] if usage changed since the
    /// paycheck read it; nothing is written in that case.
    pub fn commit_usage(&self, result: &PaycheckResult) -> EngineResult<()> {
        if result.usage_updates.is_empty() {
            return Ok(());
        }
        self.usage
            .commit_usage(&result.organization_id, &result.employee_id, &result.usage_updates)
    }

    fn run_pipeline(
        &self,
        request: &PaycheckRequest,
        progress: &mut Progress,
        started: Instant,
    ) -> EngineResult<PaycheckResult> {
        // Resolving
        let organization_id = OrganizationId::parse(request.organization_id.clone())?;
        let employee_id = EmployeeId::parse(request.employee_id.clone())?;
        request.pay_period.validate()?;
        request.inputs.validate()?;

        let as_of = request.pay_period.evaluation_date();
        let mut audit = crate::models::AuditTrace::default();
        let resolved = get_effective_structure(
            self.structures.as_ref(),
            &organization_id,
            &employee_id,
            as_of,
            self.settings.today(),
        )?;
        progress.template = Some(resolved.template.template_ref());
        let jurisdiction = &resolved.worker.jurisdiction;

        let period = PeriodValues {
            base_salary: request.inputs.base_salary,
            hours_worked: request.inputs.hours_worked,
            hourly_rate: request.inputs.hourly_rate.unwrap_or(Decimal::ZERO),
            tenure_years: request
                .inputs
                .tenure_years
                .unwrap_or_else(|| resolved.worker.tenure_years(as_of)),
        };

        audit.record(
            PipelineStage::Resolving,
            None,
            json!({
                "employee_id": employee_id,
                "organization_id": organization_id,
                "as_of": as_of,
            }),
            json!({
                "worker_structure": resolved.worker.id,
                "template": resolved.template.template_ref().to_string(),
                "evaluation_order": resolved.components.iter().map(|c| c.code()).collect::<Vec<_>>(),
                "disabled": resolved.disabled.iter().map(|o| &o.component_code).collect::<Vec<_>>(),
            }),
            format!(
                "Resolved pay structure '{}' bound to template {}",
                resolved.worker.id,
                resolved.template.template_ref()
            ),
        );
        for disabled in &resolved.disabled {
            audit.warn(
                "COMPONENT_DISABLED",
                format!(
                    "Component '{}' disabled by override '{}'",
                    disabled.component_code, disabled.id
                ),
                "info",
            );
        }

        let mut ledger = UsageLedger::new(request.pay_period.usage_year());
        let load = |key: &UsageKey, year: i32| {
            self.usage.get_usage(&organization_id, &employee_id, key, year)
        };

        // Evaluating
        progress.enter(PipelineStage::Evaluating);
        let mut values: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut gross = Decimal::ZERO;
        let mut results: Vec<EvaluatedComponentResult> = Vec::new();
        let mut pending: Vec<PendingDeduction<'_>> = Vec::new();

        for component in resolved
            .components
            .iter()
            .filter(|c| c.definition.category != ComponentCategory::Tax)
        {
            let code = component.code();
            progress.component = Some(code.to_string());
            let ctx = EvaluationContext {
                organization_id: &organization_id,
                jurisdiction,
                as_of,
                period: &period,
                results: &values,
                gross_so_far: gross,
                taxable_income: None,
                tax_rules: &[],
            };
            let value = evaluate_component(component, &ctx)?;
            let mut metadata = value.metadata;

            match component.definition.category {
                ComponentCategory::Earning => {
                    let bounds = &component.definition.bounds;
                    let key = UsageKey::Component(code.to_string());
                    let ytd = match bounds.max_annual {
                        Some(_) => ledger.used(&key, load)?,
                        None => Decimal::ZERO,
                    };
                    let bounded = apply_earning_bounds(value.amount, ytd, bounds);
                    if bounds.max_annual.is_some() {
                        ledger.record(&key, bounded.amount.max(Decimal::ZERO))?;
                    }
                    metadata.clippings.extend(bounded.clippings);

                    audit.record(
                        PipelineStage::Evaluating,
                        Some(code),
                        json!({ "raw": value.amount, "calculation": component.calculation.name() }),
                        json!({ "amount": bounded.amount }),
                        format!("Earning '{}' evaluated to {}", code, bounded.amount),
                    );
                    values.insert(code.to_string(), bounded.amount);
                    gross = add_money(gross, bounded.amount).map_err(|e| e.in_component(code))?;
                    results.push(result_for(component, bounded.amount, metadata));
                }
                ComponentCategory::Deduction => {
                    let configured = round_money(value.amount);
                    audit.record(
                        PipelineStage::Evaluating,
                        Some(code),
                        json!({ "raw": value.amount, "calculation": component.calculation.name() }),
                        json!({ "configured": configured }),
                        format!("Deduction '{}' configured at {}", code, configured),
                    );
                    values.insert(code.to_string(), configured);
                    pending.push(PendingDeduction {
                        component,
                        configured,
                        metadata,
                    });
                }
                ComponentCategory::Tax => {}
            }
        }

        // TaxApplying
        progress.enter(PipelineStage::TaxApplying);
        let allowances = self
            .allowances
            .applicable_allowances(&organization_id, jurisdiction, as_of)?;
        let mut taxable_earnings = Decimal::ZERO;
        for earning in &mut results {
            progress.component = Some(earning.code.clone());
            let allowance_type = resolved
                .template
                .component(&earning.code)
                .and_then(|c| c.allowance_type.clone());
            let allowance = allowance_type
                .as_deref()
                .filter(|_| earning.is_taxable)
                .and_then(|kind| most_specific_allowance(&allowances, kind));
            if let (Some(kind), None, true) = (&allowance_type, allowance, earning.is_taxable) {
                audit.warn(
                    "NO_ALLOWANCE_DEFINITION",
                    format!(
                        "No '{}' allowance applies to {} on {}; '{}' is fully taxable",
                        kind, jurisdiction, as_of, earning.code
                    ),
                    "warning",
                );
            }

            let limited = allowance.filter(|a| a.annual_limit.is_some());
            let key = limited.map(|a| UsageKey::Allowance(a.allowance_type.clone()));
            let ytd = match &key {
                Some(key) => ledger.used(key, load)?,
                None => Decimal::ZERO,
            };
            let split = split_taxable_earning(earning.amount, earning.is_taxable, allowance, ytd)
                .map_err(|e| e.in_component(&earning.code))?;
            if let Some(key) = &key {
                ledger.record(key, split.split.tax_free.max(Decimal::ZERO))?;
            }
            if let Some(clipping) = split.clipping {
                earning.metadata.clippings.push(clipping);
            }
            taxable_earnings = add_money(taxable_earnings, split.split.taxable)
                .map_err(|e| e.in_component(&earning.code))?;
            earning.metadata.tax_split = Some(split.split);
        }

        let (pre_tax, post_tax): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|d| d.component.definition.is_pre_tax_deduction());

        let mut deducted = Decimal::ZERO;
        for deduction in sorted_by_priority(pre_tax) {
            let amount = self.apply_pending(
                deduction,
                gross - deducted,
                DeductionTiming::PreTax,
                PipelineStage::TaxApplying,
                progress,
                &mut ledger,
                &load,
                &mut audit,
                &mut values,
                &mut results,
            )?;
            deducted += amount;
        }

        let taxable_income = round_money((taxable_earnings - deducted).max(Decimal::ZERO));
        audit.record(
            PipelineStage::TaxApplying,
            None,
            json!({ "taxable_earnings": taxable_earnings, "pre_tax_deductions": deducted }),
            json!({ "taxable_income": taxable_income }),
            format!("Taxable income is {}", taxable_income),
        );

        let tax_rules = self
            .tax_rules
            .applicable_rule_sets(&organization_id, jurisdiction, as_of)?;
        let mut total_taxes = Decimal::ZERO;
        for component in resolved
            .components
            .iter()
            .filter(|c| c.definition.category == ComponentCategory::Tax)
        {
            let code = component.code();
            progress.component = Some(code.to_string());
            let ctx = EvaluationContext {
                organization_id: &organization_id,
                jurisdiction,
                as_of,
                period: &period,
                results: &values,
                gross_so_far: gross,
                taxable_income: Some(taxable_income),
                tax_rules: &tax_rules,
            };
            let value = evaluate_component(component, &ctx)?;
            let mut metadata = value.metadata;
            let mut amount = round_money(value.amount);

            if let EffectiveCalculation::Tax { tax_type } = &component.calculation {
                let mut capped = Decimal::ZERO;
                for portion in &value.tax_portions {
                    let mut share = portion.amount;
                    if let Some(cap) = portion.annual_cap {
                        let key = UsageKey::tax_rule_set(tax_type, &portion.rule_set_id);
                        let ytd = ledger.used(&key, load)?;
                        let headroom = round_money((cap - ytd).max(Decimal::ZERO));
                        if share > headroom {
                            metadata.record_clip(share, headroom, ClipReason::AnnualTaxCap);
                            share = headroom;
                        }
                        ledger.record(&key, share)?;
                    }
                    capped = add_money(capped, share).map_err(|e| e.in_component(code))?;
                }
                amount = round_money(capped);
            }

            audit.record(
                PipelineStage::TaxApplying,
                Some(code),
                json!({ "taxable_income": taxable_income, "rule_sets": metadata.rule_sets }),
                json!({ "amount": amount }),
                format!("Tax '{}' is {}", code, amount),
            );
            values.insert(code.to_string(), amount);
            total_taxes = add_money(total_taxes, amount).map_err(|e| e.in_component(code))?;
            results.push(result_for(component, amount, metadata));
        }

        // DeductionApplying
        progress.enter(PipelineStage::DeductionApplying);
        for deduction in sorted_by_priority(post_tax) {
            let amount = self.apply_pending(
                deduction,
                gross - total_taxes - deducted,
                DeductionTiming::PostTax,
                PipelineStage::DeductionApplying,
                progress,
                &mut ledger,
                &load,
                &mut audit,
                &mut values,
                &mut results,
            )?;
            deducted += amount;
        }

        // Aggregating
        progress.enter(PipelineStage::Aggregating);
        progress.component = None;
        let components = aggregate_components(results);
        audit.record(
            PipelineStage::Aggregating,
            None,
            json!({
                "earnings": components.earnings.len(),
                "taxes": components.taxes.len(),
                "deductions": components.deductions.len(),
            }),
            json!(components.summary),
            format!("Net pay is {}", components.summary.net_pay),
        );
        audit.duration_us = started.elapsed().as_micros() as u64;

        Ok(PaycheckResult {
            calculation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            organization_id,
            employee_id,
            pay_period: request.pay_period.clone(),
            template: resolved.template.template_ref(),
            currency: resolved.template.currency.clone(),
            components,
            usage_updates: ledger.updates(),
            lifecycle: progress.lifecycle.clone(),
            audit_trace: audit,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_pending<F>(
        &self,
        deduction: PendingDeduction<'_>,
        available: Decimal,
        timing: DeductionTiming,
        stage: PipelineStage,
        progress: &mut Progress,
        ledger: &mut UsageLedger,
        load: &F,
        audit: &mut crate::models::AuditTrace,
        values: &mut BTreeMap<String, Decimal>,
        results: &mut Vec<EvaluatedComponentResult>,
    ) -> EngineResult<Decimal>
    where
        F: Fn(&UsageKey, i32) -> EngineResult<Decimal>,
    {
        let component = deduction.component;
        let code = component.code();
        progress.component = Some(code.to_string());
        let bounds = &component.definition.bounds;

        let key = UsageKey::Component(code.to_string());
        let ytd = match bounds.max_annual {
            Some(_) => ledger.used(&key, load)?,
            None => Decimal::ZERO,
        };
        let applied = apply_deduction(deduction.configured, available, ytd, bounds);
        if bounds.max_annual.is_some() {
            ledger.record(&key, applied.amount)?;
        }

        let mut metadata = deduction.metadata;
        metadata.deduction_timing = Some(timing);
        metadata.clippings.extend(applied.clippings);
        debug!(
            component = code,
            configured = %deduction.configured,
            applied = %applied.amount,
            "Deduction applied"
        );
        audit.record(
            stage,
            Some(code),
            json!({ "configured": deduction.configured, "available": available, "ytd_usage": ytd }),
            json!({ "amount": applied.amount, "new_ytd_usage": applied.new_ytd_usage }),
            match timing {
                DeductionTiming::PreTax => format!("Pre-tax deduction '{}' applied at {}", code, applied.amount),
                DeductionTiming::PostTax => format!("Post-tax deduction '{}' applied at {}", code, applied.amount),
            },
        );

        values.insert(code.to_string(), applied.amount);
        results.push(result_for(component, applied.amount, metadata));
        Ok(applied.amount)
    }
}

fn result_for(component: &ResolvedComponent, amount: Decimal, metadata: CalculationMetadata) -> EvaluatedComponentResult {
    let definition = &component.definition;
    EvaluatedComponentResult {
        code: definition.code.clone(),
        name: definition.name.clone(),
        category: definition.category,
        amount,
        is_taxable: definition.is_taxable,
        sequence_order: definition.sequence_order,
        source: component.source(),
        metadata,
    }
}

/// Lower priority first; ties by sequence order, then code.
fn sorted_by_priority(mut deductions: Vec<PendingDeduction<'_>>) -> Vec<PendingDeduction<'_>> {
    deductions.sort_by(|a, b| {
        let (a, b) = (&a.component.definition, &b.component.definition);
        a.deduction_rules()
            .priority
            .cmp(&b.deduction_rules().priority)
            .then_with(|| a.sequence_order.cmp(&b.sequence_order))
            .then_with(|| a.code.cmp(&b.code))
    });
    deductions
}

/// The most specific definition of `allowance_type`: locality over state
/// over country, organization-scoped over system-wide.
fn most_specific_allowance<'a>(
    allowances: &'a [AllowanceDefinition],
    allowance_type: &str,
) -> Option<&'a AllowanceDefinition> {
    allowances
        .iter()
        .filter(|a| a.allowance_type == allowance_type)
        .max_by(|a, b| a.specificity().cmp(&b.specificity()).then_with(|| b.id.cmp(&a.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{
        AllowanceCap, Bracket, CalculationType, ComponentBounds, DeductionRules,
        EffectiveRange, EmployeeAllowanceUsage, FormulaVariable, Jurisdiction, OverridePermissions,
        PayFrequency, PayStructureComponent, PayStructureTemplate, PercentageBase, SemVer,
        TaxMethod, TaxRuleSet, TemplateStatus, WorkerPayStructure,
    };
    use crate::store::InMemoryStore;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn org() -> OrganizationId {
        OrganizationId::parse("org_acme").unwrap()
    }

    fn component(code: &str, category: ComponentCategory, calculation: CalculationType, seq: u32) -> PayStructureComponent {
        PayStructureComponent {
            code: code.to_string(),
            name: code.to_string(),
            category,
            calculation,
            sequence_order: seq,
            depends_on_components: vec![],
            is_taxable: category == ComponentCategory::Earning,
            bounds: ComponentBounds::default(),
            override_permissions: OverridePermissions::default(),
            deduction: None,
            allowance_type: None,
        }
    }

    fn deduction(code: &str, amount: &str, timing: DeductionTiming, priority: u32, seq: u32) -> PayStructureComponent {
        let mut d = component(
            code,
            ComponentCategory::Deduction,
            CalculationType::Fixed { amount: dec(amount) },
            seq,
        );
        d.deduction = Some(DeductionRules { timing, priority });
        d
    }

    fn bracket(order: u32, min: &str, max: Option<&str>, rate: &str) -> Bracket {
        Bracket {
            bracket_order: order,
            income_min: dec(min),
            income_max: max.map(dec),
            rate_percentage: dec(rate),
            fixed_amount: Decimal::ZERO,
        }
    }

    /// The worked example: base 3000, housing 10% of base, pension 50 pre-tax
    /// capped at 500 a year with 480 used, income tax on brackets.
    fn create_example_components() -> Vec<PayStructureComponent> {
        let base = component(
            "base_pay",
            ComponentCategory::Earning,
            CalculationType::Fixed { amount: dec("3000") },
            1,
        );
        let housing = component(
            "housing",
            ComponentCategory::Earning,
            CalculationType::Percentage {
                rate: dec("10"),
                percentage_of: PercentageBase::BaseSalary,
            },
            2,
        );
        let mut pension = deduction("pension", "50", DeductionTiming::PreTax, 10, 3);
        pension.bounds.max_annual = Some(dec("500"));
        let tax = component(
            "income_tax",
            ComponentCategory::Tax,
            CalculationType::Tax {
                tax_type: "income".to_string(),
            },
            4,
        );
        vec![base, housing, pension, tax]
    }

    fn create_test_store(components: Vec<PayStructureComponent>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_template(PayStructureTemplate {
                organization_id: org(),
                template_code: "standard".to_string(),
                version: SemVer::new(1, 0, 0),
                name: "Standard".to_string(),
                status: TemplateStatus::Active,
                effective: EffectiveRange::starting(date(2025, 1, 1)),
                currency: "USD".to_string(),
                pay_frequency: PayFrequency::Monthly,
                is_organization_default: true,
                components,
            })
            .unwrap();
        store
            .insert_worker_structure(WorkerPayStructure {
                id: "wps_001".to_string(),
                organization_id: org(),
                employee_id: EmployeeId::parse("emp_001").unwrap(),
                template: TemplateRef {
                    template_code: "standard".to_string(),
                    version: SemVer::new(1, 0, 0),
                },
                effective: EffectiveRange::starting(date(2025, 1, 1)),
                is_current: true,
                jurisdiction: Jurisdiction {
                    country: "US".to_string(),
                    state: Some("CA".to_string()),
                    locality: None,
                },
                hire_date: Some(date(2020, 3, 1)),
                overrides: vec![],
            })
            .unwrap();
        store
            .insert_tax_rule_set(TaxRuleSet {
                id: "us_income".to_string(),
                organization_id: None,
                tax_type: "income".to_string(),
                name: "Income tax".to_string(),
                country: "US".to_string(),
                state: None,
                locality: None,
                effective: EffectiveRange::starting(date(2025, 1, 1)),
                method: TaxMethod::Bracket {
                    brackets: vec![
                        bracket(1, "0", Some("2000"), "10"),
                        bracket(2, "2000", Some("4000"), "20"),
                        bracket(3, "4000", None, "30"),
                    ],
                },
                annual_cap: None,
            })
            .unwrap();
        store
            .set_usage(EmployeeAllowanceUsage {
                organization_id: org(),
                employee_id: EmployeeId::parse("emp_001").unwrap(),
                usage_key: UsageKey::Component("pension".to_string()),
                year: 2026,
                amount_used: dec("480"),
            })
            .unwrap();
        store
    }

    fn create_engine(store: Arc<InMemoryStore>) -> PayrollEngine {
        PayrollEngine::new(
            store,
            EngineSettings {
                reference_date: Some(date(2026, 1, 1)),
            },
        )
    }

    fn create_request() -> PaycheckRequest {
        PaycheckRequest {
            organization_id: "org_acme".to_string(),
            employee_id: "emp_001".to_string(),
            pay_period: PayPeriod {
                start_date: date(2026, 1, 1),
                end_date: date(2026, 1, 31),
                pay_date: None,
            },
            inputs: PeriodInputs {
                base_salary: dec("3000"),
                hours_worked: dec("160"),
                hourly_rate: None,
                tenure_years: None,
            },
        }
    }

    #[test]
    fn test_example_scenario_net_pay() {
        let engine = create_engine(create_test_store(create_example_components()));
        let result = engine.compute_paycheck(&create_request()).unwrap();
        let summary = &result.components.summary;

        assert_eq!(summary.total_earnings, dec("3300.00"));
        assert_eq!(summary.total_taxes, dec("456.00"));
        assert_eq!(summary.total_deductions, dec("20.00"));
        assert_eq!(summary.net_pay, dec("2824.00"));
        assert_eq!(summary.net_pay.to_string(), "2824.00");

        let pension = &result.components.deductions[0];
        assert_eq!(pension.amount, dec("20.00"));
        assert_eq!(pension.metadata.clippings[0].reason, ClipReason::AnnualMax);
        assert_eq!(pension.metadata.deduction_timing, Some(DeductionTiming::PreTax));
    }

    #[test]
    fn test_usage_updates_are_returned_not_written() {
        let store = create_test_store(create_example_components());
        let engine = create_engine(store.clone());
        let result = engine.compute_paycheck(&create_request()).unwrap();

        assert_eq!(result.usage_updates.len(), 1);
        let update = &result.usage_updates[0];
        assert_eq!(update.previous, dec("480"));
        assert_eq!(update.new, dec("500.00"));

        let key = UsageKey::Component("pension".to_string());
        let employee = EmployeeId::parse("emp_001").unwrap();
        assert_eq!(store.get_usage(&org(), &employee, &key, 2026).unwrap(), dec("480"));

        engine.commit_usage(&result).unwrap();
        assert_eq!(store.get_usage(&org(), &employee, &key, 2026).unwrap(), dec("500"));
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let engine = create_engine(create_test_store(create_example_components()));
        let first = engine.compute_paycheck(&create_request()).unwrap();
        let second = engine.compute_paycheck(&create_request()).unwrap();
        assert_eq!(
            serde_json::to_vec(&first.components).unwrap(),
            serde_json::to_vec(&second.components).unwrap()
        );
    }

    #[test]
    fn test_lifecycle_reaches_aggregated() {
        let engine = create_engine(create_test_store(create_example_components()));
        let result = engine.compute_paycheck(&create_request()).unwrap();
        assert_eq!(
            result.lifecycle,
            vec![
                PaycheckState::Pending,
                PaycheckState::Resolving,
                PaycheckState::Evaluating,
                PaycheckState::TaxApplying,
                PaycheckState::DeductionApplying,
                PaycheckState::Aggregated,
            ]
        );
        assert!(!result.audit_trace.steps.is_empty());
    }

    #[test]
    fn test_blank_organization_fails_in_resolving() {
        let engine = create_engine(create_test_store(create_example_components()));
        let mut request = create_request();
        request.organization_id = "  ".to_string();
        let err = engine.compute_paycheck(&request).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Resolving);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_formula_failure_names_stage_and_component() {
        let mut components = create_example_components();
        components.push(component(
            "bonus",
            ComponentCategory::Earning,
            CalculationType::Formula {
                expression: "base_pay / (hours_worked - 160)".to_string(),
                formula_variables: vec![FormulaVariable {
                    name: "base_pay".to_string(),
                    optional: false,
                }],
            },
            5,
        ));
        let engine = create_engine(create_test_store(components));
        let err = engine.compute_paycheck(&create_request()).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Evaluating);
        assert_eq!(err.component_code.as_deref(), Some("bonus"));
        assert_eq!(err.kind(), ErrorKind::Evaluation);
    }

    #[test]
    fn test_missing_tax_rule_fails_in_tax_stage() {
        let mut components = create_example_components();
        components.push(component(
            "medicare",
            ComponentCategory::Tax,
            CalculationType::Tax {
                tax_type: "medicare".to_string(),
            },
            6,
        ));
        let engine = create_engine(create_test_store(components));
        let err = engine.compute_paycheck(&create_request()).unwrap_err();
        assert_eq!(err.stage, PipelineStage::TaxApplying);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.component_code.as_deref(), Some("medicare"));
    }

    #[test]
    fn test_post_tax_deductions_limited_to_remaining_pay() {
        let mut components = create_example_components();
        components.push(deduction("loan", "2000", DeductionTiming::PostTax, 1, 7));
        components.push(deduction("garnishment", "2000", DeductionTiming::PostTax, 2, 8));
        let engine = create_engine(create_test_store(components));
        let result = engine.compute_paycheck(&create_request()).unwrap();
        let summary = &result.components.summary;

        // 3300 - 456 - 20 = 2824 left: loan takes 2000, garnishment 824
        let amounts: BTreeMap<&str, Decimal> = result
            .components
            .deductions
            .iter()
            .map(|d| (d.code.as_str(), d.amount))
            .collect();
        assert_eq!(amounts["loan"], dec("2000.00"));
        assert_eq!(amounts["garnishment"], dec("824.00"));
        assert_eq!(summary.net_pay, dec("0.00"));
    }

    #[test]
    fn test_tax_free_allowance_reduces_taxable_income() {
        let mut components = create_example_components();
        components[1].allowance_type = Some("housing".to_string());
        let store = create_test_store(components);
        store
            .insert_allowance(AllowanceDefinition {
                id: "housing_us".to_string(),
                organization_id: None,
                allowance_type: "housing".to_string(),
                name: "Housing".to_string(),
                country: "US".to_string(),
                state: None,
                locality: None,
                effective: EffectiveRange::starting(date(2025, 1, 1)),
                cap: AllowanceCap::Amount { amount: dec("200") },
                annual_limit: Some(dec("2400")),
            })
            .unwrap();
        let engine = create_engine(store);
        let result = engine.compute_paycheck(&create_request()).unwrap();
        let summary = &result.components.summary;

        // taxable income = 3300 - 200 tax free - 20 pension = 3080 -> tax 416
        assert_eq!(summary.total_tax_free, dec("200.00"));
        assert_eq!(summary.total_taxable, dec("3100.00"));
        assert_eq!(summary.total_taxes, dec("416.00"));
        assert!(
            result
                .usage_updates
                .iter()
                .any(|u| u.usage_key == UsageKey::Allowance("housing".to_string()) && u.new == dec("200"))
        );
    }

    #[test]
    fn test_annual_tax_cap_applies_to_its_own_rule_set() {
        let store = create_test_store(create_example_components());
        store
            .insert_tax_rule_set(TaxRuleSet {
                id: "ca_income".to_string(),
                organization_id: None,
                tax_type: "income".to_string(),
                name: "California income tax".to_string(),
                country: "US".to_string(),
                state: Some("CA".to_string()),
                locality: None,
                effective: EffectiveRange::starting(date(2025, 1, 1)),
                method: TaxMethod::Flat {
                    rate_percentage: dec("5"),
                },
                annual_cap: Some(dec("100")),
            })
            .unwrap();
        let engine = create_engine(store);
        let result = engine.compute_paycheck(&create_request()).unwrap();

        // federal 456 uncapped, state 5% of 3280 = 164 capped at 100
        assert_eq!(result.components.summary.total_taxes, dec("556.00"));
        let tax = &result.components.taxes[0];
        assert_eq!(tax.metadata.clippings.len(), 1);
        let clipping = &tax.metadata.clippings[0];
        assert_eq!(clipping.reason, ClipReason::AnnualTaxCap);
        assert_eq!(clipping.configured, dec("164.00"));
        assert_eq!(clipping.applied, dec("100.00"));

        let update = result
            .usage_updates
            .iter()
            .find(|u| u.usage_key == UsageKey::tax_rule_set("income", "ca_income"))
            .unwrap();
        assert_eq!(update.usage_key.to_string(), "tax:income:ca_income");
        assert_eq!(update.new, dec("100.00"));
        assert!(!result.usage_updates.iter().any(|u| u.usage_key.to_string().contains("us_income")));
    }

    #[test]
    fn test_amount_out_of_range_is_evaluation_error() {
        let engine = create_engine(create_test_store(create_example_components()));
        let mut request = create_request();
        request.inputs.base_salary = Decimal::MAX;
        let err = engine.compute_paycheck(&request).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Evaluating);
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert_eq!(err.component_code.as_deref(), Some("housing"));
    }
}
