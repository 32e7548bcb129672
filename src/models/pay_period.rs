//! Pay period and period input models.
//!
//! This module contains the [`PayPeriod`] and [`PeriodInputs`] types that
//! define the calculation context for one paycheck.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Represents a pay period with its inclusive date range.
///
/// The period end date is the evaluation date: templates, overrides, tax
/// rules and allowances are resolved as of that day, and annual usage is
/// counted against its calendar year.
///
/// # Example
///
/// ```
/// use payroll_engine::models::PayPeriod;
/// use chrono::NaiveDate;
///
/// let period = PayPeriod {
///     start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
///     end_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
///     pay_date: None,
/// };
///
/// assert!(period.contains_date(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()));
/// assert_eq!(period.usage_year(), 2026);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPeriod {
    /// The start date of the pay period (inclusive).
    pub start_date: NaiveDate,
    /// The end date of the pay period (inclusive).
    pub end_date: NaiveDate,
    /// The date the paycheck is paid, if known.
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
}

impl PayPeriod {
    /// Checks if a given date falls within this pay period.
    ///
    /// The check is inclusive of both start and end dates.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    /// The date everything is resolved as of.
    pub fn evaluation_date(&self) -> NaiveDate {
        self.end_date
    }

    /// The calendar year usage counters are tracked against.
    pub fn usage_year(&self) -> i32 {
        self.end_date.year()
    }

    /// Rejects periods that end before they start.
    pub fn validate(&self) -> EngineResult<()> {
        if self.end_date < self.start_date {
            return Err(EngineError::validation(
                "pay_period",
                format!(
                    "end date {} is before start date {}",
                    self.end_date, self.start_date
                ),
            ));
        }
        Ok(())
    }
}

/// Fixed inputs for one pay period.
///
/// These populate the well-known formula variables `base_salary`,
/// `hours_worked`, `hourly_rate` and `tenure_years`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodInputs {
    /// Base salary for the period.
    #[serde(default)]
    pub base_salary: Decimal,
    /// Hours worked in the period.
    #[serde(default)]
    pub hours_worked: Decimal,
    /// Hourly rate, when the worker is paid by the hour.
    #[serde(default)]
    pub hourly_rate: Option<Decimal>,
    /// Years of service; derived from the hire date when absent.
    #[serde(default)]
    pub tenure_years: Option<Decimal>,
}

impl PeriodInputs {
    /// Rejects negative inputs.
    pub fn validate(&self) -> EngineResult<()> {
        let checks = [
            ("base_salary", Some(self.base_salary)),
            ("hours_worked", Some(self.hours_worked)),
            ("hourly_rate", self.hourly_rate),
            ("tenure_years", self.tenure_years),
        ];
        for (field, value) in checks {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(EngineError::validation(field, "must not be negative"));
            }
        }
        Ok(())
    }
}
