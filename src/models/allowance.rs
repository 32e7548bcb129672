//! Allowance definitions and annual usage counters.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::effective::EffectiveRange;
use super::ids::{EmployeeId, OrganizationId};
use super::worker::Jurisdiction;
use crate::error::{EngineError, EngineResult};

/// The per-period tax-free limit of an allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AllowanceCap {
    /// A fixed tax-free amount per period.
    Amount {
        /// The tax-free amount.
        amount: Decimal,
    },
    /// A percentage of the earning is tax free.
    Percentage {
        /// The tax-free share, as a percentage.
        rate: Decimal,
    },
}

/// A tax-free allowance for one allowance type in one jurisdiction.
///
/// Taxable earnings that carry a matching `allowance_type` are split into a
/// tax-free part, bounded by [`AllowanceCap`] and by the remaining
/// `annual_limit`, and a taxable remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceDefinition {
    /// Definition id.
    pub id: String,
    /// Owning organization; `None` for system-wide definitions.
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    /// Allowance type matched against components.
    pub allowance_type: String,
    /// Display name.
    pub name: String,
    /// Country code.
    pub country: String,
    /// State code.
    #[serde(default)]
    pub state: Option<String>,
    /// Locality code.
    #[serde(default)]
    pub locality: Option<String>,
    /// Dates the definition applies to.
    pub effective: EffectiveRange,
    /// Per-period tax-free limit.
    pub cap: AllowanceCap,
    /// Tax-free limit per calendar year.
    #[serde(default)]
    pub annual_limit: Option<Decimal>,
}

impl AllowanceDefinition {
    /// Returns true if the definition covers the jurisdiction on `date`.
    pub fn applies_to(&self, jurisdiction: &Jurisdiction, date: chrono::NaiveDate) -> bool {
        self.effective.covers(date)
            && jurisdiction.is_within(&self.country, self.state.as_deref(), self.locality.as_deref())
    }

    /// Specificity used to pick between matching definitions: locality
    /// beats state beats country, and organization rows beat system rows.
    pub fn specificity(&self) -> (u8, bool) {
        let level = match (&self.state, &self.locality) {
            (_, Some(_)) => 2,
            (Some(_), None) => 1,
            (None, None) => 0,
        };
        (level, self.organization_id.is_some())
    }
}

/// Key of an annual usage counter.
///
/// Rendered as `component:<code>`, `allowance:<type>` or
/// `tax:<tax_type>:<rule_set_id>`.
///
/// # Example
///
/// ```
/// use payroll_engine::models::UsageKey;
///
/// let key: UsageKey = "allowance:housing".parse().unwrap();
/// assert_eq!(key, UsageKey::Allowance("housing".to_string()));
/// assert_eq!(key.to_string(), "allowance:housing");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UsageKey {
    /// Cumulative amount paid or deducted by a component.
    Component(String),
    /// Cumulative tax-free amount of an allowance type.
    Allowance(String),
    /// Cumulative tax collected under one capped rule set, named
    /// `<tax_type>:<rule_set_id>`.
    Tax(String),
}

impl UsageKey {
    /// The counter an annual tax cap of `rule_set_id` is tracked against.
    pub fn tax_rule_set(tax_type: &str, rule_set_id: &str) -> Self {
        Self::Tax(format!("{}:{}", tax_type, rule_set_id))
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(code) => write!(f, "component:{}", code),
            Self::Allowance(kind) => write!(f, "allowance:{}", kind),
            Self::Tax(kind) => write!(f, "tax:{}", kind),
        }
    }
}

impl FromStr for UsageKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, name) = s
            .split_once(':')
            .filter(|(_, name)| !name.is_empty())
            .ok_or_else(|| EngineError::validation("usage_key", format!("'{}' is not prefix:name", s)))?;
        match prefix {
            "component" => Ok(Self::Component(name.to_string())),
            "allowance" => Ok(Self::Allowance(name.to_string())),
            "tax" => Ok(Self::Tax(name.to_string())),
            other => Err(EngineError::validation(
                "usage_key",
                format!("unknown usage key prefix '{}'", other),
            )),
        }
    }
}

impl Serialize for UsageKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UsageKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A stored per-employee usage counter for one calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeAllowanceUsage {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// The employee.
    pub employee_id: EmployeeId,
    /// What is being counted.
    pub usage_key: UsageKey,
    /// Calendar year.
    pub year: i32,
    /// Amount used so far this year.
    pub amount_used: Decimal,
}

impl EmployeeAllowanceUsage {
    /// Rejects negative balances.
    pub fn validate(&self) -> EngineResult<()> {
        if self.amount_used < Decimal::ZERO {
            return Err(EngineError::validation(
                "amount_used",
                format!("usage for '{}' cannot be negative", self.usage_key),
            ));
        }
        Ok(())
    }
}

/// A usage increment produced by one paycheck, applied only on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageUpdate {
    /// What is being counted.
    pub usage_key: UsageKey,
    /// Calendar year.
    pub year: i32,
    /// The snapshot the paycheck was computed against.
    pub previous: Decimal,
    /// The value after this paycheck.
    pub new: Decimal,
}

impl UsageUpdate {
    /// Returns the amount added by this paycheck.
    pub fn increment(&self) -> Decimal {
        self.new - self.previous
    }
}
