//! Core data models for the payroll engine.
//!
//! This module contains all the domain models used throughout the engine.

mod allowance;
mod effective;
mod ids;
mod money;
mod pay_period;
mod paycheck;
mod tax;
mod template;
mod worker;

pub use allowance::{
    AllowanceCap, AllowanceDefinition, EmployeeAllowanceUsage, UsageKey, UsageUpdate,
};
pub use effective::{EffectiveRange, ensure_no_overlap};
pub use ids::{EmployeeId, OrganizationId};
pub use money::{AmountOverflow, MONEY_SCALE, add_money, percent_of, round_money};
pub use pay_period::{PayPeriod, PeriodInputs};
pub use paycheck::{
    AuditStep, AuditTrace, AuditWarning, BracketSlice, CalculationMetadata, ClipReason, Clipping,
    EvaluatedComponentResult, PaycheckComponents, PaycheckResult, PaycheckState, PaycheckSummary,
    PipelineStage, ResultSource, TaxSplit,
};
pub use tax::{Bracket, JurisdictionLevel, TaxMethod, TaxRuleSet, ensure_valid_brackets};
pub use template::{
    CalculationType, ComponentBounds, ComponentCategory, DeductionRules, DeductionTiming,
    FormulaVariable, OverridePermissions, PayFrequency, PayStructureComponent,
    PayStructureTemplate, PercentageBase, SemVer, TemplateRef, TemplateStatus, TierBasis,
};
pub use worker::{ApprovalStatus, ComponentOverride, Jurisdiction, OverrideAction, WorkerPayStructure};
