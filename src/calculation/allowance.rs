//! Allowance splitting, deduction caps and usage tracking.
//!
//! Caps never fail a paycheck. Every function here clips to the applicable
//! bound and reports the clip as a [`Clipping`] so audits can show that an
//! amount was capped.
//!
//! Annual caps are tracked through a paycheck-scoped [`UsageLedger`]: it
//! snapshots the stored usage the first time a key is read, accumulates this
//! paycheck's increments, and hands back [`UsageUpdate`]s for the caller to
//! commit together with the paycheck.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    AllowanceCap, AllowanceDefinition, AmountOverflow, ClipReason, Clipping, ComponentBounds,
    TaxSplit, UsageKey, UsageUpdate, add_money, percent_of, round_money,
};

/// The applied amount of a bounded component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedAmount {
    /// The amount after bounds, rounded.
    pub amount: Decimal,
    /// Annual usage after this amount.
    pub new_ytd_usage: Decimal,
    /// Clips applied, in order.
    pub clippings: Vec<Clipping>,
}

fn clip(amount: &mut Decimal, limit: Decimal, reason: ClipReason, clippings: &mut Vec<Clipping>) {
    if *amount > limit {
        clippings.push(Clipping {
            configured: *amount,
            applied: limit,
            reason,
        });
        *amount = limit;
    }
}

fn annual_headroom(max_annual: Decimal, ytd_usage: Decimal) -> Decimal {
    (max_annual - ytd_usage).max(Decimal::ZERO)
}

/// Applies an earning's per-period and annual bounds.
///
/// The raw amount is raised to `min_per_period`, lowered to
/// `max_per_period`, then clipped to the annual headroom
/// `max_annual - ytd_usage`. The result is rounded.
pub fn apply_earning_bounds(raw: Decimal, ytd_usage: Decimal, bounds: &ComponentBounds) -> BoundedAmount {
    let mut amount = raw;
    let mut clippings = Vec::new();

    if let Some(min) = bounds.min_per_period {
        if amount < min {
            clippings.push(Clipping {
                configured: amount,
                applied: min,
                reason: ClipReason::PerPeriodMin,
            });
            amount = min;
        }
    }
    if let Some(max) = bounds.max_per_period {
        clip(&mut amount, max, ClipReason::PerPeriodMax, &mut clippings);
    }
    if let Some(max_annual) = bounds.max_annual {
        clip(
            &mut amount,
            annual_headroom(max_annual, ytd_usage),
            ClipReason::AnnualMax,
            &mut clippings,
        );
    }

    let amount = round_money(amount);
    BoundedAmount {
        amount,
        new_ytd_usage: ytd_usage.saturating_add(amount),
        clippings,
    }
}

/// Applies a deduction against the pay available to deduct from.
///
/// The configured amount (floored at zero) is clipped, in order, to the
/// per-period maximum, the annual headroom `max_annual - ytd_usage` (never
/// negative) and the available pay. The applied amount is rounded and added
/// to the year-to-date usage.
///
/// # Examples
///
/// ```
/// use payroll_engine::calculation::apply_deduction;
/// use payroll_engine::models::{ClipReason, ComponentBounds};
/// use rust_decimal::Decimal;
///
/// let bounds = ComponentBounds {
///     max_annual: Some(Decimal::from(1000)),
///     ..Default::default()
/// };
/// let result = apply_deduction(Decimal::from(100), Decimal::from(3000), Decimal::from(950), &bounds);
///
/// assert_eq!(result.amount, Decimal::from(50));
/// assert_eq!(result.new_ytd_usage, Decimal::from(1000));
/// assert_eq!(result.clippings[0].reason, ClipReason::AnnualMax);
/// ```
pub fn apply_deduction(
    configured: Decimal,
    available: Decimal,
    ytd_usage: Decimal,
    bounds: &ComponentBounds,
) -> BoundedAmount {
    let mut amount = configured.max(Decimal::ZERO);
    let mut clippings = Vec::new();

    if let Some(min) = bounds.min_per_period {
        if amount < min {
            clippings.push(Clipping {
                configured: amount,
                applied: min,
                reason: ClipReason::PerPeriodMin,
            });
            amount = min;
        }
    }
    if let Some(max) = bounds.max_per_period {
        clip(&mut amount, max, ClipReason::PerPeriodMax, &mut clippings);
    }
    if let Some(max_annual) = bounds.max_annual {
        clip(
            &mut amount,
            annual_headroom(max_annual, ytd_usage),
            ClipReason::AnnualMax,
            &mut clippings,
        );
    }
    clip(
        &mut amount,
        available.max(Decimal::ZERO),
        ClipReason::InsufficientPay,
        &mut clippings,
    );

    let amount = round_money(amount);
    BoundedAmount {
        amount,
        new_ytd_usage: ytd_usage.saturating_add(amount),
        clippings,
    }
}

/// The tax-free and taxable portions of one earning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxSplitResult {
    /// The split recorded on the earning.
    pub split: TaxSplit,
    /// Set when the allowance did not cover the whole earning.
    pub clipping: Option<Clipping>,
}

/// Splits an earning into tax-free and taxable portions.
///
/// Non-taxable earnings are wholly tax free. Taxable earnings without an
/// applicable allowance are wholly taxable. Otherwise the tax-free portion
/// is the earning limited by the allowance cap (a fixed amount or a
/// percentage of the earning) and by the remaining annual limit.
///
/// # Arguments
///
/// * `amount` - The earning's final, rounded amount
/// * `is_taxable` - The component's taxability flag
/// * `allowance` - The allowance definition for the earning's allowance type
/// * `ytd_tax_free` - Tax-free amount already used this year for the type
///
/// # Errors
///
/// Returns [`AmountOverflow`] when a percentage cap is out of range.
pub fn split_taxable_earning(
    amount: Decimal,
    is_taxable: bool,
    allowance: Option<&AllowanceDefinition>,
    ytd_tax_free: Decimal,
) -> Result<TaxSplitResult, AmountOverflow> {
    if !is_taxable {
        return Ok(TaxSplitResult {
            split: TaxSplit {
                tax_free: amount,
                taxable: Decimal::ZERO,
                allowance_type: None,
            },
            clipping: None,
        });
    }
    let Some(allowance) = allowance else {
        return Ok(TaxSplitResult {
            split: TaxSplit {
                tax_free: Decimal::ZERO,
                taxable: amount,
                allowance_type: None,
            },
            clipping: None,
        });
    };

    let eligible = amount.max(Decimal::ZERO);
    let cap = match &allowance.cap {
        AllowanceCap::Amount { amount } => *amount,
        AllowanceCap::Percentage { rate } => percent_of(eligible, *rate)?,
    };
    let mut tax_free = eligible.min(cap.max(Decimal::ZERO));
    if let Some(limit) = allowance.annual_limit {
        tax_free = tax_free.min(annual_headroom(limit, ytd_tax_free));
    }
    let tax_free = round_money(tax_free);

    let clipping = (tax_free < eligible).then(|| Clipping {
        configured: eligible,
        applied: tax_free,
        reason: ClipReason::AllowanceCap,
    });

    Ok(TaxSplitResult {
        split: TaxSplit {
            tax_free,
            taxable: amount - tax_free,
            allowance_type: Some(allowance.allowance_type.clone()),
        },
        clipping,
    })
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    previous: Decimal,
    current: Decimal,
}

/// Paycheck-scoped view of annual usage counters.
///
/// The ledger never writes to a store. Its [`UsageLedger::updates`] are
/// committed by the caller only after the whole paycheck succeeds.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    year: i32,
    entries: BTreeMap<UsageKey, LedgerEntry>,
}

impl UsageLedger {
    /// Creates an empty ledger for a calendar year.
    pub fn new(year: i32) -> Self {
        Self {
            year,
            entries: BTreeMap::new(),
        }
    }

    /// The calendar year being tracked.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Returns current usage for `key`, loading the stored snapshot on
    /// first access.
    pub fn used<F>(&mut self, key: &UsageKey, load: F) -> EngineResult<Decimal>
    where
        F: FnOnce(&UsageKey, i32) -> EngineResult<Decimal>,
    {
        if let Some(entry) = self.entries.get(key) {
            return Ok(entry.current);
        }
        let previous = load(key, self.year)?;
        if previous < Decimal::ZERO {
            return Err(EngineError::integrity(format!(
                "stored usage for '{}' in {} is negative: {}",
                key, self.year, previous
            )));
        }
        self.entries.insert(
            key.clone(),
            LedgerEntry {
                previous,
                current: previous,
            },
        );
        Ok(previous)
    }

    /// Adds `amount` to a key read earlier through [`UsageLedger::used`].
    pub fn record(&mut self, key: &UsageKey, amount: Decimal) -> EngineResult<()> {
        if amount < Decimal::ZERO {
            return Err(EngineError::validation(
                "usage",
                format!("increment for '{}' must not be negative: {}", key, amount),
            ));
        }
        let entry = self.entries.get_mut(key).ok_or_else(|| {
            EngineError::integrity(format!("usage for '{}' recorded before it was read", key))
        })?;
        entry.current = add_money(entry.current, amount).map_err(|_| {
            EngineError::integrity(format!("usage for '{}' is out of range", key))
        })?;
        Ok(())
    }

    /// The increments accumulated so far, in key order. Keys that were read
    /// but not changed are omitted.
    pub fn updates(&self) -> Vec<UsageUpdate> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.current != entry.previous)
            .map(|(key, entry)| UsageUpdate {
                usage_key: key.clone(),
                year: self.year,
                previous: entry.previous,
                new: entry.current,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EffectiveRange;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn bounds(max_per_period: Option<&str>, max_annual: Option<&str>) -> ComponentBounds {
        ComponentBounds {
            min_per_period: None,
            max_per_period: max_per_period.map(dec),
            max_annual: max_annual.map(dec),
        }
    }

    fn create_allowance(cap: AllowanceCap, annual_limit: Option<&str>) -> AllowanceDefinition {
        AllowanceDefinition {
            id: "housing_us".to_string(),
            organization_id: None,
            allowance_type: "housing".to_string(),
            name: "Housing".to_string(),
            country: "US".to_string(),
            state: None,
            locality: None,
            effective: EffectiveRange::starting(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            cap,
            annual_limit: annual_limit.map(dec),
        }
    }

    #[test]
    fn test_annual_cap_clips_to_headroom() {
        let result = apply_deduction(dec("100"), dec("5000"), dec("950"), &bounds(None, Some("1000")));
        assert_eq!(result.amount, dec("50"));
        assert_eq!(result.new_ytd_usage, dec("1000"));
        assert_eq!(result.clippings.len(), 1);
        assert_eq!(result.clippings[0].configured, dec("100"));
        assert_eq!(result.clippings[0].reason, ClipReason::AnnualMax);
    }

    #[test]
    fn test_annual_cap_already_exceeded_gives_zero() {
        let result = apply_deduction(dec("100"), dec("5000"), dec("1200"), &bounds(None, Some("1000")));
        assert_eq!(result.amount, Decimal::ZERO);
        assert_eq!(result.new_ytd_usage, dec("1200"));
    }

    #[test]
    fn test_pension_example_clips_to_20() {
        let result = apply_deduction(dec("50"), dec("3300"), dec("480"), &bounds(None, Some("500")));
        assert_eq!(result.amount, dec("20.00"));
        assert_eq!(result.new_ytd_usage, dec("500.00"));
    }

    #[test]
    fn test_per_period_max_applies_before_annual() {
        let result = apply_deduction(dec("300"), dec("5000"), dec("0"), &bounds(Some("200"), Some("150")));
        assert_eq!(result.amount, dec("150"));
        let reasons: Vec<ClipReason> = result.clippings.iter().map(|c| c.reason).collect();
        assert_eq!(reasons, vec![ClipReason::PerPeriodMax, ClipReason::AnnualMax]);
    }

    #[test]
    fn test_deduction_limited_by_available_pay() {
        let result = apply_deduction(dec("500"), dec("120.50"), dec("0"), &bounds(None, None));
        assert_eq!(result.amount, dec("120.50"));
        assert_eq!(result.clippings[0].reason, ClipReason::InsufficientPay);
    }

    #[test]
    fn test_negative_available_pay_gives_zero() {
        let result = apply_deduction(dec("10"), dec("-5"), dec("0"), &bounds(None, None));
        assert_eq!(result.amount, Decimal::ZERO);
    }

    #[test]
    fn test_unclipped_deduction_has_no_clippings() {
        let result = apply_deduction(dec("25"), dec("1000"), dec("0"), &bounds(Some("50"), Some("600")));
        assert_eq!(result.amount, dec("25.00"));
        assert!(result.clippings.is_empty());
    }

    #[test]
    fn test_earning_bounds_raise_to_minimum() {
        let bounds = ComponentBounds {
            min_per_period: Some(dec("100")),
            ..Default::default()
        };
        let result = apply_earning_bounds(dec("40"), Decimal::ZERO, &bounds);
        assert_eq!(result.amount, dec("100.00"));
        assert_eq!(result.clippings[0].reason, ClipReason::PerPeriodMin);
    }

    #[test]
    fn test_earning_bounds_round_after_clipping() {
        let result = apply_earning_bounds(dec("10.005"), Decimal::ZERO, &ComponentBounds::default());
        assert_eq!(result.amount.to_string(), "10.01");
    }

    #[test]
    fn test_non_taxable_earning_is_tax_free() {
        let result = split_taxable_earning(dec("300.00"), false, None, Decimal::ZERO).unwrap();
        assert_eq!(result.split.tax_free, dec("300.00"));
        assert_eq!(result.split.taxable, Decimal::ZERO);
    }

    #[test]
    fn test_taxable_earning_without_allowance_is_taxable() {
        let result = split_taxable_earning(dec("300.00"), true, None, Decimal::ZERO).unwrap();
        assert_eq!(result.split.taxable, dec("300.00"));
        assert!(result.clipping.is_none());
    }

    #[test]
    fn test_allowance_amount_cap() {
        let allowance = create_allowance(AllowanceCap::Amount { amount: dec("100") }, None);
        let result = split_taxable_earning(dec("300.00"), true, Some(&allowance), Decimal::ZERO).unwrap();
        assert_eq!(result.split.tax_free, dec("100.00"));
        assert_eq!(result.split.taxable, dec("200.00"));
        assert_eq!(result.split.allowance_type.as_deref(), Some("housing"));
        assert_eq!(result.clipping.unwrap().reason, ClipReason::AllowanceCap);
    }

    #[test]
    fn test_allowance_percentage_cap() {
        let allowance = create_allowance(AllowanceCap::Percentage { rate: dec("50") }, None);
        let result = split_taxable_earning(dec("300.00"), true, Some(&allowance), Decimal::ZERO).unwrap();
        assert_eq!(result.split.tax_free, dec("150.00"));
        assert_eq!(result.split.taxable, dec("150.00"));
    }

    #[test]
    fn test_allowance_annual_limit() {
        let allowance = create_allowance(AllowanceCap::Amount { amount: dec("100") }, Some("1000"));
        let result = split_taxable_earning(dec("300.00"), true, Some(&allowance), dec("960")).unwrap();
        assert_eq!(result.split.tax_free, dec("40.00"));
        assert_eq!(result.split.taxable, dec("260.00"));
    }

    #[test]
    fn test_allowance_covering_whole_earning_is_not_clipped() {
        let allowance = create_allowance(AllowanceCap::Amount { amount: dec("500") }, None);
        let result = split_taxable_earning(dec("300.00"), true, Some(&allowance), Decimal::ZERO).unwrap();
        assert_eq!(result.split.tax_free, dec("300.00"));
        assert!(result.clipping.is_none());
    }

    #[test]
    fn test_ledger_snapshots_once_and_accumulates() {
        let key = UsageKey::Component("pension".to_string());
        let mut ledger = UsageLedger::new(2026);
        assert_eq!(ledger.used(&key, |_, _| Ok(dec("480"))).unwrap(), dec("480"));
        ledger.record(&key, dec("20")).unwrap();
        // second read does not reload
        let reloaded = ledger
            .used(&key, |_, _| panic!("snapshot must not be reloaded"))
            .unwrap();
        assert_eq!(reloaded, dec("500"));

        let updates = ledger.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].previous, dec("480"));
        assert_eq!(updates[0].new, dec("500"));
        assert_eq!(updates[0].year, 2026);
    }

    #[test]
    fn test_ledger_omits_unchanged_keys() {
        let key = UsageKey::Tax("medicare".to_string());
        let mut ledger = UsageLedger::new(2026);
        ledger.used(&key, |_, _| Ok(Decimal::ZERO)).unwrap();
        ledger.record(&key, Decimal::ZERO).unwrap();
        assert!(ledger.updates().is_empty());
    }

    #[test]
    fn test_ledger_rejects_unread_and_negative_records() {
        let key = UsageKey::Component("pension".to_string());
        let mut ledger = UsageLedger::new(2026);
        assert!(matches!(
            ledger.record(&key, dec("1")),
            Err(EngineError::Integrity { .. })
        ));
        ledger.used(&key, |_, _| Ok(Decimal::ZERO)).unwrap();
        assert!(matches!(
            ledger.record(&key, dec("-1")),
            Err(EngineError::Validation { .. })
        ));
    }

    #[test]
    fn test_ledger_rejects_negative_snapshot() {
        let key = UsageKey::Component("pension".to_string());
        let mut ledger = UsageLedger::new(2026);
        assert!(ledger.used(&key, |_, _| Ok(dec("-5"))).is_err());
    }

    #[test]
    fn test_ledger_rejects_usage_out_of_range() {
        let key = UsageKey::Component("pension".to_string());
        let mut ledger = UsageLedger::new(2026);
        ledger.used(&key, |_, _| Ok(Decimal::MAX)).unwrap();
        assert!(matches!(
            ledger.record(&key, dec("1")),
            Err(EngineError::Integrity { .. })
        ));
    }

    #[test]
    fn test_allowance_percentage_cap_out_of_range() {
        let allowance = create_allowance(AllowanceCap::Percentage { rate: dec("500") }, None);
        assert_eq!(
            split_taxable_earning(Decimal::MAX, true, Some(&allowance), Decimal::ZERO),
            Err(AmountOverflow)
        );
    }
}
