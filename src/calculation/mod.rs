//! Calculation logic for the payroll engine.
//!
//! This module contains the pipeline stages for one paycheck: resolving the
//! effective pay structure, ordering components by dependency, evaluating
//! each component (fixed, percentage, formula, tiered and tax), bracket and
//! flat-rate tax arithmetic, allowance splits with deduction caps, and the
//! final gross-to-net aggregation.

mod aggregate;
mod allowance;
mod evaluator;
pub mod expression;
mod ordering;
mod resolver;
mod tax;

pub use aggregate::aggregate_components;
pub use allowance::{
    BoundedAmount, TaxSplitResult, UsageLedger, apply_deduction, apply_earning_bounds,
    split_taxable_earning,
};
pub use evaluator::{
    ComponentValue, EvaluationContext, PeriodValues, TaxPortion, WellKnown, evaluate_component,
};
pub use expression::{Expression, ExpressionError};
pub use ordering::{PlanNode, topological_order};
pub use resolver::{
    EffectiveCalculation, ResolvedComponent, ResolvedStructure, get_effective_structure,
};
pub use tax::{
    BracketTaxResult, FlatTaxResult, calculate_bracket_tax, calculate_flat_rate_tax,
    progressive_amount,
};
