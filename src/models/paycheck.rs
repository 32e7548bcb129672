//! Paycheck result models.
//!
//! This module contains the [`PaycheckResult`] type and its associated
//! structures: the itemized [`EvaluatedComponentResult`]s, the grouped
//! [`PaycheckComponents`] breakdown returned to clients, the audit trace and
//! the computation lifecycle states.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::allowance::UsageUpdate;
use super::ids::{EmployeeId, OrganizationId};
use super::pay_period::PayPeriod;
use super::template::{ComponentCategory, DeductionTiming, TemplateRef};

/// Where a component's behaviour came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultSource {
    /// The template definition, unmodified.
    TemplateDefault,
    /// A worker override.
    Override {
        /// The applied override row.
        override_id: String,
        /// The override action name.
        action: String,
    },
}

/// Why an amount was reduced or raised from its configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipReason {
    /// Above the per-period maximum.
    PerPeriodMax,
    /// Below the per-period minimum.
    PerPeriodMin,
    /// Above the remaining annual headroom.
    AnnualMax,
    /// More than the pay left to deduct from.
    InsufficientPay,
    /// Tax-free part limited by the allowance.
    AllowanceCap,
    /// Tax limited by the rule set's annual cap.
    AnnualTaxCap,
}

/// One recorded clip: the amount before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clipping {
    /// The amount before clipping.
    pub configured: Decimal,
    /// The amount after clipping.
    pub applied: Decimal,
    /// Why it was clipped.
    pub reason: ClipReason,
}

/// One bracket's contribution to a progressive amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketSlice {
    /// The bracket's order.
    pub bracket_order: u32,
    /// The portion of income taxed in this bracket.
    pub slice: Decimal,
    /// The bracket's rate.
    pub rate_percentage: Decimal,
    /// The bracket's fixed amount.
    pub fixed_amount: Decimal,
    /// `slice * rate / 100 + fixed_amount`, unrounded.
    pub amount: Decimal,
}

/// Tax-free and taxable portions of an earning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSplit {
    /// The portion covered by an allowance.
    pub tax_free: Decimal,
    /// The portion counted toward taxable income.
    pub taxable: Decimal,
    /// The allowance type used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowance_type: Option<String>,
}

/// How a component's amount was computed, kept for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationMetadata {
    /// The calculation type name.
    pub calculation_type: String,
    /// Percentage base, tier basis or taxable income the amount was computed over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Decimal>,
    /// Percentage or hourly rate applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
    /// The evaluated expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Bracket or tier breakdown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brackets: Vec<BracketSlice>,
    /// Tax rule sets applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_sets: Vec<String>,
    /// Tax-free and taxable split, for earnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_split: Option<TaxSplit>,
    /// Deduction timing, for deductions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduction_timing: Option<DeductionTiming>,
    /// Clips applied, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clippings: Vec<Clipping>,
}

impl CalculationMetadata {
    /// Creates metadata for a calculation type.
    pub fn new(calculation_type: impl Into<String>) -> Self {
        Self {
            calculation_type: calculation_type.into(),
            ..Default::default()
        }
    }

    /// Records a clip when the amount actually changed.
    pub fn record_clip(&mut self, configured: Decimal, applied: Decimal, reason: ClipReason) {
        if configured != applied {
            self.clippings.push(Clipping {
                configured,
                applied,
                reason,
            });
        }
    }

    /// Returns true if any clip was recorded.
    pub fn is_capped(&self) -> bool {
        !self.clippings.is_empty()
    }
}

/// The evaluated amount of one component in one paycheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatedComponentResult {
    /// Component code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Result group.
    pub category: ComponentCategory,
    /// Final amount, rounded to two places.
    pub amount: Decimal,
    /// Whether the earning counts toward taxable income.
    pub is_taxable: bool,
    /// Template sequence order.
    pub sequence_order: u32,
    /// Template default or override.
    pub source: ResultSource,
    /// How the amount was computed.
    pub metadata: CalculationMetadata,
}

/// Gross-to-net totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaycheckSummary {
    /// Sum of all earnings.
    pub total_earnings: Decimal,
    /// Sum of tax-free earning portions.
    pub total_tax_free: Decimal,
    /// Sum of taxable earning portions.
    pub total_taxable: Decimal,
    /// Sum of all taxes.
    pub total_taxes: Decimal,
    /// Sum of all deductions.
    pub total_deductions: Decimal,
    /// `total_earnings - total_taxes - total_deductions`.
    pub net_pay: Decimal,
}

/// The grouped component breakdown returned to clients.
///
/// Holds no timestamps or ids, so identical inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaycheckComponents {
    /// Earning results in evaluation order.
    pub earnings: Vec<EvaluatedComponentResult>,
    /// Tax results in evaluation order.
    pub taxes: Vec<EvaluatedComponentResult>,
    /// Deduction results in application order.
    pub deductions: Vec<EvaluatedComponentResult>,
    /// Totals.
    pub summary: PaycheckSummary,
}

/// The stage of the per-employee pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Structure, template, override resolution and evaluation planning.
    Resolving,
    /// Earnings and raw deduction amounts.
    Evaluating,
    /// Allowances, pre-tax deductions and taxes.
    TaxApplying,
    /// Post-tax deductions.
    DeductionApplying,
    /// Grouping and totals.
    Aggregating,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Evaluating => "evaluating",
            Self::TaxApplying => "tax_applying",
            Self::DeductionApplying => "deduction_applying",
            Self::Aggregating => "aggregating",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one paycheck computation.
///
/// `Pending → Resolving → Evaluating → TaxApplying → DeductionApplying →
/// Aggregated`, with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaycheckState {
    /// Not started.
    Pending,
    /// Resolving the structure.
    Resolving,
    /// Evaluating components.
    Evaluating,
    /// Applying allowances and taxes.
    TaxApplying,
    /// Applying post-tax deductions.
    DeductionApplying,
    /// Finished successfully.
    Aggregated,
    /// Finished with an error.
    Failed,
}

impl PaycheckState {
    /// Returns true for `Aggregated` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aggregated | Self::Failed)
    }

    /// Returns true if `next` may follow `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use PaycheckState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Resolving)
            | (Resolving, Evaluating)
            | (Evaluating, TaxApplying)
            | (TaxApplying, DeductionApplying)
            | (DeductionApplying, Aggregated) => true,
            _ => false,
        }
    }
}

impl From<PipelineStage> for PaycheckState {
    fn from(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Resolving => Self::Resolving,
            PipelineStage::Evaluating => Self::Evaluating,
            PipelineStage::TaxApplying => Self::TaxApplying,
            PipelineStage::DeductionApplying => Self::DeductionApplying,
            PipelineStage::Aggregating => Self::Aggregated,
        }
    }
}

/// A single step in the audit trace recording a calculation decision.
///
/// Each step captures the input, output, and reasoning for one component or
/// resolution decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStep {
    /// The sequential step number.
    pub step_number: u32,
    /// The pipeline stage the step belongs to.
    pub stage: PipelineStage,
    /// The component involved, if any.
    pub component_code: Option<String>,
    /// The input data for this step.
    pub input: serde_json::Value,
    /// The output data from this step.
    pub output: serde_json::Value,
    /// Human-readable explanation of the decision.
    pub reasoning: String,
}

/// A warning generated during calculation.
///
/// Warnings indicate potential issues that don't prevent calculation
/// but may require attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditWarning {
    /// A code identifying the type of warning.
    pub code: String,
    /// A human-readable description of the warning.
    pub message: String,
    /// The severity level (e.g., "low", "medium", "high").
    pub severity: String,
}

/// The complete audit trace for a calculation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrace {
    /// The sequence of calculation steps.
    pub steps: Vec<AuditStep>,
    /// Any warnings generated during calculation.
    pub warnings: Vec<AuditWarning>,
    /// The total calculation duration in microseconds.
    pub duration_us: u64,
}

impl AuditTrace {
    /// Appends a step, numbering it after the existing ones.
    pub fn record(
        &mut self,
        stage: PipelineStage,
        component_code: Option<&str>,
        input: serde_json::Value,
        output: serde_json::Value,
        reasoning: impl Into<String>,
    ) {
        let step_number = self.steps.len() as u32 + 1;
        self.steps.push(AuditStep {
            step_number,
            stage,
            component_code: component_code.map(String::from),
            input,
            output,
            reasoning: reasoning.into(),
        });
    }

    /// Appends a warning.
    pub fn warn(&mut self, code: &str, message: impl Into<String>, severity: &str) {
        self.warnings.push(AuditWarning {
            code: code.to_string(),
            message: message.into(),
            severity: severity.to_string(),
        });
    }
}

/// The complete result of a paycheck computation.
///
/// Wraps the deterministic [`PaycheckComponents`] with identifiers, the
/// pending usage increments and the audit trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaycheckResult {
    /// Unique identifier for this calculation.
    pub calculation_id: Uuid,
    /// When the calculation was performed.
    pub timestamp: DateTime<Utc>,
    /// The version of the engine that performed the calculation.
    pub engine_version: String,
    /// The organization scope.
    pub organization_id: OrganizationId,
    /// The employee the paycheck is for.
    pub employee_id: EmployeeId,
    /// The pay period.
    pub pay_period: PayPeriod,
    /// The template version used.
    pub template: TemplateRef,
    /// Currency of every amount.
    pub currency: String,
    /// The grouped breakdown.
    pub components: PaycheckComponents,
    /// Usage increments to commit with the paycheck.
    pub usage_updates: Vec<UsageUpdate>,
    /// Lifecycle states visited, in order.
    pub lifecycle: Vec<PaycheckState>,
    /// Complete audit trace of calculation decisions.
    pub audit_trace: AuditTrace,
}
