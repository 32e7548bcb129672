//! Tax rule sets and progressive bracket tables.
//!
//! Bracket tables are shared by tax rule sets and by tiered pay components,
//! so the structural checks live here next to the [`Bracket`] type.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::effective::EffectiveRange;
use super::ids::OrganizationId;
use super::worker::Jurisdiction;
use crate::error::{EngineError, EngineResult};

/// One row of a progressive table.
///
/// # Example
///
/// ```
/// use payroll_engine::models::Bracket;
/// use rust_decimal::Decimal;
///
/// let top = Bracket {
///     bracket_order: 3,
///     income_min: Decimal::from(4000),
///     income_max: None,
///     rate_percentage: Decimal::from(30),
///     fixed_amount: Decimal::ZERO,
/// };
/// assert!(top.is_unbounded());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    /// Position of the bracket in the table.
    pub bracket_order: u32,
    /// Lower bound of the bracket.
    pub income_min: Decimal,
    /// Upper bound of the bracket; `None` for the unbounded top bracket.
    #[serde(default)]
    pub income_max: Option<Decimal>,
    /// Marginal rate applied to the slice, as a percentage.
    pub rate_percentage: Decimal,
    /// Amount added whenever the bracket is reached.
    #[serde(default)]
    pub fixed_amount: Decimal,
}

impl Bracket {
    /// Returns true for the open-ended top bracket.
    pub fn is_unbounded(&self) -> bool {
        self.income_max.is_none()
    }

    /// Returns the bracket width, or `None` when unbounded.
    pub fn width(&self) -> Option<Decimal> {
        self.income_max.map(|max| max - self.income_min)
    }
}

/// Checks that a bracket table is contiguous, non-overlapping and has
/// exactly one unbounded bracket, which must come last.
///
/// An empty table passes; it is reported at calculation time instead.
/// `owner` names the rule set or component in the error.
pub fn ensure_valid_brackets(owner: &str, brackets: &[Bracket]) -> EngineResult<()> {
    if brackets.is_empty() {
        return Ok(());
    }
    let fail = |message: String| {
        Err(EngineError::configuration(
            format!("bracket table for '{}': {}", owner, message),
            [owner.to_string()],
        ))
    };

    let mut sorted: Vec<&Bracket> = brackets.iter().collect();
    sorted.sort_by_key(|b| b.bracket_order);

    for bracket in &sorted {
        if bracket.income_min < Decimal::ZERO {
            return fail(format!("bracket {} starts below zero", bracket.bracket_order));
        }
        if bracket.rate_percentage < Decimal::ZERO {
            return fail(format!("bracket {} has a negative rate", bracket.bracket_order));
        }
        if let Some(max) = bracket.income_max {
            if max <= bracket.income_min {
                return fail(format!(
                    "bracket {} has income_max {} not above income_min {}",
                    bracket.bracket_order, max, bracket.income_min
                ));
            }
        }
    }

    for pair in sorted.windows(2) {
        if let [lower, upper] = pair {
            if lower.bracket_order == upper.bracket_order {
                return fail(format!("bracket order {} is used twice", lower.bracket_order));
            }
            match lower.income_max {
                None => {
                    return fail(format!(
                        "unbounded bracket {} is followed by bracket {}",
                        lower.bracket_order, upper.bracket_order
                    ));
                }
                Some(max) if max != upper.income_min => {
                    let relation = if max > upper.income_min { "overlaps" } else { "leaves a gap before" };
                    return fail(format!(
                        "bracket {} {} bracket {}",
                        lower.bracket_order, relation, upper.bracket_order
                    ));
                }
                Some(_) => {}
            }
        }
    }

    let unbounded = sorted.iter().filter(|b| b.is_unbounded()).count();
    if unbounded != 1 {
        return fail(format!("expected exactly one unbounded bracket, found {}", unbounded));
    }
    Ok(())
}

/// How a rule set computes tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TaxMethod {
    /// Progressive brackets.
    Bracket {
        /// The bracket table.
        brackets: Vec<Bracket>,
    },
    /// A single rate on all income.
    Flat {
        /// The rate, as a percentage.
        rate_percentage: Decimal,
    },
}

/// The jurisdiction level a rule set applies at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JurisdictionLevel {
    /// Whole country.
    Country,
    /// State or province.
    State,
    /// City or county.
    Locality,
}

/// A tax rule set for one tax type in one jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRuleSet {
    /// Rule set id.
    pub id: String,
    /// Owning organization; `None` for system-wide rules.
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    /// Tax type matched by `tax` components.
    pub tax_type: String,
    /// Display name.
    pub name: String,
    /// Country code.
    pub country: String,
    /// State code, for state and locality rules.
    #[serde(default)]
    pub state: Option<String>,
    /// Locality code, for locality rules.
    #[serde(default)]
    pub locality: Option<String>,
    /// Dates the rule set applies to.
    pub effective: EffectiveRange,
    /// Bracket or flat calculation.
    #[serde(flatten)]
    pub method: TaxMethod,
    /// Maximum tax collected per calendar year.
    #[serde(default)]
    pub annual_cap: Option<Decimal>,
}

impl TaxRuleSet {
    /// Returns the level this rule set applies at.
    pub fn level(&self) -> JurisdictionLevel {
        match (&self.state, &self.locality) {
            (_, Some(_)) => JurisdictionLevel::Locality,
            (Some(_), None) => JurisdictionLevel::State,
            (None, None) => JurisdictionLevel::Country,
        }
    }

    /// Returns true if the rule set covers the jurisdiction on `date`.
    pub fn applies_to(&self, jurisdiction: &Jurisdiction, date: chrono::NaiveDate) -> bool {
        self.effective.covers(date)
            && jurisdiction.is_within(&self.country, self.state.as_deref(), self.locality.as_deref())
    }

    /// Checks the rule set's structure.
    pub fn validate(&self) -> EngineResult<()> {
        if self.locality.is_some() && self.state.is_none() {
            return Err(EngineError::configuration(
                format!("tax rule set '{}' has a locality without a state", self.id),
                [self.id.clone()],
            ));
        }
        if self.annual_cap.is_some_and(|cap| cap < Decimal::ZERO) {
            return Err(EngineError::configuration(
                format!("tax rule set '{}' has a negative annual cap", self.id),
                [self.id.clone()],
            ));
        }
        match &self.method {
            TaxMethod::Bracket { brackets } => ensure_valid_brackets(&self.id, brackets),
            TaxMethod::Flat { rate_percentage } if *rate_percentage < Decimal::ZERO => {
                Err(EngineError::configuration(
                    format!("tax rule set '{}' has a negative rate", self.id),
                    [self.id.clone()],
                ))
            }
            TaxMethod::Flat { .. } => Ok(()),
        }
    }
}
