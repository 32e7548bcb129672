//! Bracket and flat-rate tax arithmetic.
//!
//! This module provides the pure functions used for tax components and for
//! tiered pay components. Nothing here reads or writes rule-set state; usage
//! caps are passed in by the caller.

use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::models::{AmountOverflow, Bracket, BracketSlice, add_money, percent_of, round_money};

/// The result of a progressive calculation over a bracket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketTaxResult {
    /// The total amount.
    pub amount: Decimal,
    /// Each processed bracket's contribution, in bracket order.
    pub slices: Vec<BracketSlice>,
}

/// Walks a bracket table and returns the unrounded progressive amount.
///
/// Brackets are processed in `bracket_order`. Each bracket takes a slice of
/// the remaining income no wider than `income_max - income_min` (the
/// unbounded bracket takes everything left) and contributes
/// `slice * rate / 100 + fixed_amount`. Processing stops once no income
/// remains. Shared by tax brackets and tiered components.
///
/// # Errors
///
/// Returns [`AmountOverflow`] when a contribution or the total leaves the
/// representable range.
pub fn progressive_amount(income: Decimal, brackets: &[Bracket]) -> Result<BracketTaxResult, AmountOverflow> {
    let mut sorted: Vec<&Bracket> = brackets.iter().collect();
    sorted.sort_by_key(|b| b.bracket_order);

    let mut remaining = income;
    let mut total = Decimal::ZERO;
    let mut slices = Vec::new();

    for bracket in sorted {
        if remaining <= Decimal::ZERO {
            break;
        }
        let slice = match bracket.width() {
            Some(width) => remaining.min(width),
            None => remaining,
        };
        let amount = add_money(percent_of(slice, bracket.rate_percentage)?, bracket.fixed_amount)?;
        total = add_money(total, amount)?;
        remaining -= slice;
        slices.push(BracketSlice {
            bracket_order: bracket.bracket_order,
            slice,
            rate_percentage: bracket.rate_percentage,
            fixed_amount: bracket.fixed_amount,
            amount,
        });
    }

    Ok(BracketTaxResult {
        amount: total,
        slices,
    })
}

fn out_of_range(income: Decimal) -> EngineError {
    EngineError::validation("income", format!("tax on income {} is out of range", income))
}

/// Calculates progressive tax on `income` over a bracket table.
///
/// # Arguments
///
/// * `income` - The taxable income for the period
/// * `brackets` - The rule set's brackets, in any order
///
/// # Returns
///
/// The tax rounded to two decimal places at the end only, with the
/// per-bracket breakdown. An empty table yields zero and logs a warning,
/// since it is almost certainly a misconfigured rule set.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] when `income` is negative or the tax
/// on it is out of range.
///
/// # Examples
///
/// ```
/// use payroll_engine::calculation::calculate_bracket_tax;
/// use payroll_engine::models::Bracket;
/// use rust_decimal::Decimal;
///
/// let bracket = |order, min: i64, max: Option<i64>, rate: i64| Bracket {
///     bracket_order: order,
///     income_min: Decimal::from(min),
///     income_max: max.map(Decimal::from),
///     rate_percentage: Decimal::from(rate),
///     fixed_amount: Decimal::ZERO,
/// };
/// let brackets = vec![
///     bracket(1, 0, Some(2000), 10),
///     bracket(2, 2000, Some(4000), 20),
///     bracket(3, 4000, None, 30),
/// ];
///
/// let result = calculate_bracket_tax(Decimal::from(5000), &brackets).unwrap();
/// assert_eq!(result.amount.to_string(), "900.00");
/// ```
pub fn calculate_bracket_tax(income: Decimal, brackets: &[Bracket]) -> EngineResult<BracketTaxResult> {
    if income < Decimal::ZERO {
        return Err(EngineError::validation(
            "income",
            format!("taxable income {} must not be negative", income),
        ));
    }
    if brackets.is_empty() {
        warn!(
            income = %income,
            "Bracket table is empty; tax is zero. This is likely a misconfigured rule set"
        );
        return Ok(BracketTaxResult {
            amount: round_money(Decimal::ZERO),
            slices: Vec::new(),
        });
    }

    let result = progressive_amount(income, brackets).map_err(|_| out_of_range(income))?;
    Ok(BracketTaxResult {
        amount: round_money(result.amount),
        slices: result.slices,
    })
}

/// The result of a flat-rate calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatTaxResult {
    /// The tax after the cap, rounded.
    pub amount: Decimal,
    /// The tax before the cap, unrounded.
    pub uncapped: Decimal,
    /// Whether the cap reduced the tax.
    pub cap_applied: bool,
}

/// Calculates `income * rate / 100`, capped at `cap` when one is given.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] when `income` is negative.
///
/// # Examples
///
/// ```
/// use payroll_engine::calculation::calculate_flat_rate_tax;
/// use rust_decimal::Decimal;
///
/// let result = calculate_flat_rate_tax(
///     Decimal::from(10000),
///     Decimal::from(5),
///     Some(Decimal::from(200)),
/// )
/// .unwrap();
/// assert_eq!(result.amount.to_string(), "200.00");
/// assert!(result.cap_applied);
/// ```
pub fn calculate_flat_rate_tax(
    income: Decimal,
    rate: Decimal,
    cap: Option<Decimal>,
) -> EngineResult<FlatTaxResult> {
    if income < Decimal::ZERO {
        return Err(EngineError::validation(
            "income",
            format!("taxable income {} must not be negative", income),
        ));
    }
    let uncapped = percent_of(income, rate).map_err(|_| out_of_range(income))?;
    let (amount, cap_applied) = match cap {
        Some(cap) if uncapped > cap => (cap.max(Decimal::ZERO), true),
        _ => (uncapped, false),
    };
    Ok(FlatTaxResult {
        amount: round_money(amount),
        uncapped,
        cap_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn bracket(order: u32, min: &str, max: Option<&str>, rate: &str, fixed: &str) -> Bracket {
        Bracket {
            bracket_order: order,
            income_min: dec(min),
            income_max: max.map(dec),
            rate_percentage: dec(rate),
            fixed_amount: dec(fixed),
        }
    }

    fn create_standard_brackets() -> Vec<Bracket> {
        vec![
            bracket(1, "0", Some("2000"), "10", "0"),
            bracket(2, "2000", Some("4000"), "20", "0"),
            bracket(3, "4000", None, "30", "0"),
        ]
    }

    #[test]
    fn test_bracket_tax_example_5000() {
        let result = calculate_bracket_tax(dec("5000"), &create_standard_brackets()).unwrap();
        assert_eq!(result.amount, dec("900.00"));
        let slices: Vec<Decimal> = result.slices.iter().map(|s| s.slice).collect();
        assert_eq!(slices, vec![dec("2000"), dec("2000"), dec("1000")]);
        assert_eq!(result.slices[2].amount, dec("300"));
    }

    #[test]
    fn test_bracket_tax_within_first_bracket() {
        let result = calculate_bracket_tax(dec("1500"), &create_standard_brackets()).unwrap();
        assert_eq!(result.amount, dec("150.00"));
        assert_eq!(result.slices.len(), 1);
    }

    #[test]
    fn test_bracket_tax_at_boundary_stops() {
        let result = calculate_bracket_tax(dec("2000"), &create_standard_brackets()).unwrap();
        assert_eq!(result.amount, dec("200.00"));
        assert_eq!(result.slices.len(), 1);
    }

    #[test]
    fn test_bracket_tax_for_3280() {
        // 2000 * 10% + 1280 * 20%
        let result = calculate_bracket_tax(dec("3280"), &create_standard_brackets()).unwrap();
        assert_eq!(result.amount, dec("456.00"));
    }

    #[test]
    fn test_bracket_tax_zero_income() {
        let result = calculate_bracket_tax(Decimal::ZERO, &create_standard_brackets()).unwrap();
        assert_eq!(result.amount, dec("0.00"));
        assert!(result.slices.is_empty());
    }

    #[test]
    fn test_bracket_tax_rounds_once_at_end() {
        let brackets = vec![
            bracket(1, "0", Some("1"), "0.5", "0"),
            bracket(2, "1", None, "0.5", "0"),
        ];
        // 0.005 + 0.005 = 0.01; rounding each slice would give 0.02
        let result = calculate_bracket_tax(dec("2"), &brackets).unwrap();
        assert_eq!(result.amount, dec("0.01"));
    }

    #[test]
    fn test_fixed_amount_added_per_reached_bracket() {
        let brackets = vec![
            bracket(1, "0", Some("1000"), "0", "10"),
            bracket(2, "1000", None, "10", "5"),
        ];
        assert_eq!(calculate_bracket_tax(dec("500"), &brackets).unwrap().amount, dec("10.00"));
        assert_eq!(calculate_bracket_tax(dec("1500"), &brackets).unwrap().amount, dec("65.00"));
    }

    #[test]
    fn test_bracket_order_not_input_order() {
        let mut brackets = create_standard_brackets();
        brackets.reverse();
        let result = calculate_bracket_tax(dec("5000"), &brackets).unwrap();
        assert_eq!(result.amount, dec("900.00"));
    }

    #[test]
    fn test_negative_income_rejected() {
        let err = calculate_bracket_tax(dec("-1"), &create_standard_brackets()).unwrap_err();
        assert!(matches!(err, EngineError::Validation { ref field, .. } if field == "income"));
    }

    #[test]
    fn test_empty_brackets_yield_zero() {
        let result = calculate_bracket_tax(dec("5000"), &[]).unwrap();
        assert_eq!(result.amount, dec("0.00"));
    }

    #[test]
    fn test_flat_tax_capped() {
        let result = calculate_flat_rate_tax(dec("10000"), dec("5"), Some(dec("200"))).unwrap();
        assert_eq!(result.amount, dec("200.00"));
        assert_eq!(result.uncapped, dec("500"));
        assert!(result.cap_applied);
    }

    #[test]
    fn test_flat_tax_under_cap() {
        let result = calculate_flat_rate_tax(dec("1000"), dec("5"), Some(dec("200"))).unwrap();
        assert_eq!(result.amount, dec("50.00"));
        assert!(!result.cap_applied);
    }

    #[test]
    fn test_flat_tax_without_cap_rounds_half_up() {
        let result = calculate_flat_rate_tax(dec("100.10"), dec("1.45"), None).unwrap();
        // 1.45145 -> 1.45
        assert_eq!(result.amount, dec("1.45"));
        let result = calculate_flat_rate_tax(dec("0.5"), dec("1"), None).unwrap();
        // 0.005 -> 0.01
        assert_eq!(result.amount, dec("0.01"));
    }

    #[test]
    fn test_flat_tax_negative_income_rejected() {
        assert!(calculate_flat_rate_tax(dec("-5"), dec("5"), None).is_err());
    }

    #[test]
    fn test_progressive_amount_is_unrounded() {
        let brackets = vec![bracket(1, "0", None, "3.333", "0")];
        let result = progressive_amount(dec("10"), &brackets).unwrap();
        assert_eq!(result.amount, dec("0.3333"));
    }

    #[test]
    fn test_tax_out_of_range_is_an_error() {
        let brackets = vec![bracket(1, "0", None, "50", "0")];
        let err = calculate_bracket_tax(Decimal::MAX, &brackets).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert!(calculate_flat_rate_tax(Decimal::MAX, dec("150"), None).is_err());
    }
}
