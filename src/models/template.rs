//! Pay structure templates and their component definitions.
//!
//! A [`PayStructureTemplate`] is a versioned, organization-scoped list of
//! [`PayStructureComponent`]s. Each component carries a [`CalculationType`],
//! a tagged variant with one arm per calculation kind, so a component can
//! only hold the fields that make sense for how it is computed.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::effective::EffectiveRange;
use super::ids::OrganizationId;
use super::tax::{Bracket, ensure_valid_brackets};
use crate::error::{EngineError, EngineResult};

/// A semantic version `major.minor.patch`.
///
/// # Example
///
/// ```
/// use payroll_engine::models::SemVer;
///
/// let version: SemVer = "1.2.3".parse().unwrap();
/// assert_eq!(version.to_string(), "1.2.3");
/// assert!(version < "1.10.0".parse().unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemVer {
    /// Incompatible component set changes.
    pub major: u32,
    /// Compatible additions.
    pub minor: u32,
    /// Corrections.
    pub patch: u32,
}

impl SemVer {
    /// Creates a version from its parts.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for SemVer {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::validation("version", format!("'{}' is not major.minor.patch", s));
        let mut parts = s.trim().split('.');
        let mut next = || -> EngineResult<u32> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(invalid)
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for SemVer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemVer {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifies one template version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateRef {
    /// The template code shared by all versions.
    pub template_code: String,
    /// The bound version.
    pub version: SemVer,
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.template_code, self.version)
    }
}

/// Lifecycle status of a template version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    /// Still being authored; never used for pay.
    Draft,
    /// In use.
    Active,
    /// Retired, but still valid for historical dates.
    Deprecated,
}

/// How often the template pays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFrequency {
    /// Every week.
    Weekly,
    /// Every two weeks.
    Biweekly,
    /// Twice a month.
    SemiMonthly,
    /// Once a month.
    Monthly,
}

/// The group a component's result is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentCategory {
    /// Adds to gross pay.
    Earning,
    /// Subtracted from pay, before or after tax.
    Deduction,
    /// A tax withheld from pay.
    Tax,
}

/// The base a percentage component is applied to.
///
/// Serialized as a string: the well-known bases `grossPay`, `baseSalary`
/// and `taxableIncome` (snake case accepted too), or any other string as a
/// component code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PercentageBase {
    /// Sum of all earnings.
    GrossPay,
    /// The period's base salary input.
    BaseSalary,
    /// Taxable income after allowances and pre-tax deductions.
    TaxableIncome,
    /// The result of another component.
    Component(String),
}

impl From<String> for PercentageBase {
    fn from(value: String) -> Self {
        match value.as_str() {
            "grossPay" | "gross_pay" => Self::GrossPay,
            "baseSalary" | "base_salary" => Self::BaseSalary,
            "taxableIncome" | "taxable_income" => Self::TaxableIncome,
            _ => Self::Component(value),
        }
    }
}

impl From<PercentageBase> for String {
    fn from(value: PercentageBase) -> Self {
        match value {
            PercentageBase::GrossPay => "grossPay".to_string(),
            PercentageBase::BaseSalary => "baseSalary".to_string(),
            PercentageBase::TaxableIncome => "taxableIncome".to_string(),
            PercentageBase::Component(code) => code,
        }
    }
}

/// The quantity a tier table is evaluated over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TierBasis {
    /// Sum of all earnings.
    GrossPay,
    /// The period's base salary input.
    BaseSalary,
    /// Hours worked in the period.
    HoursWorked,
    /// Completed years of service.
    TenureYears,
    /// The result of another component.
    Component(String),
}

impl From<String> for TierBasis {
    fn from(value: String) -> Self {
        match value.as_str() {
            "grossPay" | "gross_pay" => Self::GrossPay,
            "baseSalary" | "base_salary" => Self::BaseSalary,
            "hoursWorked" | "hours_worked" => Self::HoursWorked,
            "tenureYears" | "tenure_years" => Self::TenureYears,
            _ => Self::Component(value),
        }
    }
}

impl From<TierBasis> for String {
    fn from(value: TierBasis) -> Self {
        match value {
            TierBasis::GrossPay => "grossPay".to_string(),
            TierBasis::BaseSalary => "baseSalary".to_string(),
            TierBasis::HoursWorked => "hoursWorked".to_string(),
            TierBasis::TenureYears => "tenureYears".to_string(),
            TierBasis::Component(code) => code,
        }
    }
}

/// A component referenced by a formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormulaVariable {
    /// The referenced component code.
    pub name: String,
    /// When true, a disabled component reads as zero instead of failing.
    #[serde(default)]
    pub optional: bool,
}

/// How a component's amount is computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalculationType {
    /// A fixed amount per period.
    Fixed {
        /// The template default amount.
        amount: Decimal,
    },
    /// `base * rate / 100`.
    Percentage {
        /// The percentage rate.
        rate: Decimal,
        /// What the rate applies to.
        percentage_of: PercentageBase,
    },
    /// An arithmetic expression over period inputs and other components.
    Formula {
        /// The expression source.
        expression: String,
        /// Component codes the expression reads.
        #[serde(default)]
        formula_variables: Vec<FormulaVariable>,
    },
    /// A progressive tier table over a basis.
    Tiered {
        /// The quantity the tiers slice.
        basis: TierBasis,
        /// The tier table, ordered by `order`.
        tiers: Vec<Bracket>,
    },
    /// Tax computed from the applicable tax rule sets.
    Tax {
        /// The tax type looked up in the tax rule store.
        tax_type: String,
    },
}

impl CalculationType {
    /// Returns the snake case name of the calculation type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::Percentage { .. } => "percentage",
            Self::Formula { .. } => "formula",
            Self::Tiered { .. } => "tiered",
            Self::Tax { .. } => "tax",
        }
    }
}

/// Per-period and annual bounds on a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentBounds {
    /// Lowest amount paid per period.
    #[serde(default)]
    pub min_per_period: Option<Decimal>,
    /// Highest amount paid per period.
    #[serde(default)]
    pub max_per_period: Option<Decimal>,
    /// Highest cumulative amount per calendar year.
    #[serde(default)]
    pub max_annual: Option<Decimal>,
}

/// Which kinds of worker overrides a component accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePermissions {
    /// Amount, percentage and rate overrides.
    #[serde(default)]
    pub allow_amount: bool,
    /// Formula overrides.
    #[serde(default)]
    pub allow_formula: bool,
    /// Disabling the component.
    #[serde(default)]
    pub allow_disable: bool,
}

/// Whether a deduction reduces taxable income.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionTiming {
    /// Taken before tax; reduces taxable income.
    PreTax,
    /// Taken from net pay after tax.
    PostTax,
}

/// Ordering rules for a deduction component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionRules {
    /// Pre-tax or post-tax.
    pub timing: DeductionTiming,
    /// Lower priorities are applied first.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    100
}

impl Default for DeductionRules {
    fn default() -> Self {
        Self {
            timing: DeductionTiming::PostTax,
            priority: default_priority(),
        }
    }
}

/// One component definition within a template version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayStructureComponent {
    /// Code, unique within the template.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Result group.
    pub category: ComponentCategory,
    /// How the amount is computed.
    pub calculation: CalculationType,
    /// Tie-break order for evaluation and display.
    pub sequence_order: u32,
    /// Components that must be evaluated first.
    #[serde(default)]
    pub depends_on_components: Vec<String>,
    /// Whether an earning counts toward taxable income.
    #[serde(default)]
    pub is_taxable: bool,
    /// Per-period and annual bounds.
    #[serde(default)]
    pub bounds: ComponentBounds,
    /// Accepted override kinds.
    #[serde(default)]
    pub override_permissions: OverridePermissions,
    /// Deduction ordering; defaults to post-tax, priority 100.
    #[serde(default)]
    pub deduction: Option<DeductionRules>,
    /// Allowance type used to split a taxable earning into tax-free and
    /// taxable portions.
    #[serde(default)]
    pub allowance_type: Option<String>,
}

impl PayStructureComponent {
    /// Returns the deduction rules, falling back to the defaults.
    pub fn deduction_rules(&self) -> DeductionRules {
        self.deduction.unwrap_or_default()
    }

    /// Returns true for deductions taken before tax.
    pub fn is_pre_tax_deduction(&self) -> bool {
        self.category == ComponentCategory::Deduction
            && self.deduction_rules().timing == DeductionTiming::PreTax
    }

    /// Checks the definition for combinations that cannot be evaluated.
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |message: String| Err(EngineError::configuration(message, [self.code.clone()]));

        if self.code.trim().is_empty() {
            return Err(EngineError::configuration("component code is empty", Vec::<String>::new()));
        }

        match (&self.calculation, self.category) {
            (CalculationType::Tax { .. }, category) if category != ComponentCategory::Tax => {
                return fail(format!(
                    "component '{}' uses a tax calculation but is not in the tax category",
                    self.code
                ));
            }
            (
                CalculationType::Percentage {
                    percentage_of: PercentageBase::TaxableIncome,
                    ..
                },
                category,
            ) if category != ComponentCategory::Tax => {
                return fail(format!(
                    "component '{}' uses taxableIncome, which is only available to tax components",
                    self.code
                ));
            }
            (CalculationType::Tiered { tiers, .. }, _) => {
                ensure_valid_brackets(&self.code, tiers)?;
            }
            _ => {}
        }

        if self.deduction.is_some() && self.category != ComponentCategory::Deduction {
            return fail(format!(
                "component '{}' has deduction rules but is not a deduction",
                self.code
            ));
        }

        let bounds = &self.bounds;
        for value in [bounds.min_per_period, bounds.max_per_period, bounds.max_annual]
            .into_iter()
            .flatten()
        {
            if value < Decimal::ZERO {
                return fail(format!("component '{}' has a negative bound", self.code));
            }
        }
        if let (Some(min), Some(max)) = (bounds.min_per_period, bounds.max_per_period) {
            if min > max {
                return fail(format!(
                    "component '{}' has min_per_period {} above max_per_period {}",
                    self.code, min, max
                ));
            }
        }
        Ok(())
    }
}

/// A versioned pay structure template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayStructureTemplate {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Code shared by all versions.
    pub template_code: String,
    /// This version.
    pub version: SemVer,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: TemplateStatus,
    /// Dates the version may be used for.
    pub effective: EffectiveRange,
    /// ISO currency code of all amounts.
    pub currency: String,
    /// Pay frequency.
    pub pay_frequency: PayFrequency,
    /// Whether this version is the organization's default template.
    #[serde(default)]
    pub is_organization_default: bool,
    /// Component definitions.
    pub components: Vec<PayStructureComponent>,
}

impl PayStructureTemplate {
    /// Returns the reference identifying this version.
    pub fn template_ref(&self) -> TemplateRef {
        TemplateRef {
            template_code: self.template_code.clone(),
            version: self.version,
        }
    }

    /// Looks up a component by code.
    pub fn component(&self, code: &str) -> Option<&PayStructureComponent> {
        self.components.iter().find(|c| c.code == code)
    }

    /// Validates every component and checks that codes are unique.
    pub fn validate(&self) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for component in &self.components {
            if !seen.insert(component.code.as_str()) {
                return Err(EngineError::configuration(
                    format!(
                        "template {} defines component '{}' more than once",
                        self.template_ref(),
                        component.code
                    ),
                    [component.code.clone()],
                ));
            }
            component.validate()?;
        }
        Ok(())
    }
}
