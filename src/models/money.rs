//! Monetary rounding helpers.
//!
//! Every component result is rounded exactly once, after its final
//! computation, with round-half-up to two decimal places.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::error::EngineError;

/// Number of decimal places carried by monetary amounts.
pub const MONEY_SCALE: u32 = 2;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Rounds a monetary amount to two decimal places using round-half-up.
///
/// The result always carries exactly two decimal places so that serialized
/// output is stable (`300` becomes `300.00`).
///
/// # Example
///
/// ```
/// use payroll_engine::models::round_money;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// assert_eq!(round_money(Decimal::from_str("2.345").unwrap()).to_string(), "2.35");
/// assert_eq!(round_money(Decimal::from_str("-2.345").unwrap()).to_string(), "-2.35");
/// assert_eq!(round_money(Decimal::from(300)).to_string(), "300.00");
/// ```
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Monetary arithmetic left the range `Decimal` can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("monetary amount is out of range")]
pub struct AmountOverflow;

impl AmountOverflow {
    /// Reports the overflow as an evaluation failure of `component`.
    pub fn in_component(self, component: &str) -> EngineError {
        EngineError::evaluation(component, self.to_string())
    }
}

/// Returns `base * rate / 100` without rounding.
///
/// # Example
///
/// ```
/// use payroll_engine::models::percent_of;
/// use rust_decimal::Decimal;
///
/// assert_eq!(percent_of(Decimal::from(3000), Decimal::from(10)), Ok(Decimal::from(300)));
/// assert!(percent_of(Decimal::MAX, Decimal::from(200)).is_err());
/// ```
pub fn percent_of(base: Decimal, rate: Decimal) -> Result<Decimal, AmountOverflow> {
    base.checked_mul(rate)
        .and_then(|product| product.checked_div(ONE_HUNDRED))
        .ok_or(AmountOverflow)
}

/// Adds two amounts.
pub fn add_money(a: Decimal, b: Decimal) -> Result<Decimal, AmountOverflow> {
    a.checked_add(b).ok_or(AmountOverflow)
}
