//! Gross-to-net aggregation.

use rust_decimal::Decimal;

use crate::models::{
    ComponentCategory, EvaluatedComponentResult, PaycheckComponents, PaycheckSummary, round_money,
};

/// Groups evaluated components by category and computes the summary.
///
/// Each group is ordered by `(sequence_order, code)`. Tax-free and taxable
/// totals are read from the tax split recorded on each earning; an earning
/// without a split counts wholly toward its taxability flag.
///
/// `net_pay = total_earnings - total_taxes - total_deductions`. This is the
/// only place paycheck totals are computed.
///
/// # Examples
///
/// ```
/// use payroll_engine::calculation::aggregate_components;
/// use payroll_engine::models::{
///     CalculationMetadata, ComponentCategory, EvaluatedComponentResult, ResultSource,
/// };
/// use rust_decimal::Decimal;
///
/// let item = |code: &str, category, amount: i64| EvaluatedComponentResult {
///     code: code.to_string(),
///     name: code.to_string(),
///     category,
///     amount: Decimal::from(amount),
///     is_taxable: true,
///     sequence_order: 1,
///     source: ResultSource::TemplateDefault,
///     metadata: CalculationMetadata::new("fixed"),
/// };
///
/// let components = aggregate_components(vec![
///     item("base_pay", ComponentCategory::Earning, 3000),
///     item("income_tax", ComponentCategory::Tax, 400),
///     item("union_dues", ComponentCategory::Deduction, 25),
/// ]);
/// assert_eq!(components.summary.net_pay.to_string(), "2575.00");
/// ```
pub fn aggregate_components(results: Vec<EvaluatedComponentResult>) -> PaycheckComponents {
    let mut earnings = Vec::new();
    let mut taxes = Vec::new();
    let mut deductions = Vec::new();
    for result in results {
        match result.category {
            ComponentCategory::Earning => earnings.push(result),
            ComponentCategory::Tax => taxes.push(result),
            ComponentCategory::Deduction => deductions.push(result),
        }
    }
    for group in [&mut earnings, &mut taxes, &mut deductions] {
        group.sort_by(|a, b| {
            a.sequence_order
                .cmp(&b.sequence_order)
                .then_with(|| a.code.cmp(&b.code))
        });
    }

    let total = |group: &[EvaluatedComponentResult]| -> Decimal { group.iter().map(|r| r.amount).sum() };
    let total_earnings = total(&earnings);
    let total_taxes = total(&taxes);
    let total_deductions = total(&deductions);

    let (total_tax_free, total_taxable) = earnings.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(tax_free, taxable), earning| match &earning.metadata.tax_split {
            Some(split) => (tax_free + split.tax_free, taxable + split.taxable),
            None if earning.is_taxable => (tax_free, taxable + earning.amount),
            None => (tax_free + earning.amount, taxable),
        },
    );

    let summary = PaycheckSummary {
        total_earnings: round_money(total_earnings),
        total_tax_free: round_money(total_tax_free),
        total_taxable: round_money(total_taxable),
        total_taxes: round_money(total_taxes),
        total_deductions: round_money(total_deductions),
        net_pay: round_money(total_earnings - total_taxes - total_deductions),
    };

    PaycheckComponents {
        earnings,
        taxes,
        deductions,
        summary,
    }
}
