//! Effective-dated intervals.
//!
//! Templates, worker assignments, overrides, tax rule sets and allowances are
//! all valid over a date range. [`EffectiveRange`] models that range with an
//! inclusive end date, where `None` means open ended.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// An inclusive date range with an optional end.
///
/// # Example
///
/// ```
/// use payroll_engine::models::EffectiveRange;
/// use chrono::NaiveDate;
///
/// let range = EffectiveRange::new(
///     NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
///     Some(NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()),
/// );
/// assert!(range.covers(NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()));
/// assert!(!range.covers(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveRange {
    /// First day the record is effective.
    pub from: NaiveDate,
    /// Last day the record is effective; `None` means open ended.
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl EffectiveRange {
    /// Creates a range from its bounds.
    pub fn new(from: NaiveDate, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Creates an open-ended range starting at `from`.
    pub fn starting(from: NaiveDate) -> Self {
        Self { from, to: None }
    }

    /// Returns true if `date` falls inside the range.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.from && self.to.is_none_or(|to| date <= to)
    }

    /// Returns true if the two ranges share at least one day.
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_before_other = self.to.is_some_and(|to| to < other.from);
        let other_before_self = other.to.is_some_and(|to| to < self.from);
        !(self_before_other || other_before_self)
    }

    /// Returns true if the range ends before it starts.
    pub fn is_inverted(&self) -> bool {
        self.to.is_some_and(|to| to < self.from)
    }
}

impl Ord for EffectiveRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.from.cmp(&other.from).then_with(|| match (self.to, other.to) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
    }
}

impl PartialOrd for EffectiveRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EffectiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "{}..={}", self.from, to),
            None => write!(f, "{}..", self.from),
        }
    }
}

/// Checks that no two ranges overlap and none is inverted.
///
/// `label` names the owner of the ranges in the error message.
pub fn ensure_no_overlap<'a, I>(label: &str, ranges: I) -> EngineResult<()>
where
    I: IntoIterator<Item = &'a EffectiveRange>,
{
    let mut sorted: Vec<&EffectiveRange> = ranges.into_iter().collect();
    if let Some(inverted) = sorted.iter().find(|r| r.is_inverted()) {
        return Err(EngineError::integrity(format!(
            "{}: effective range {} ends before it starts",
            label, inverted
        )));
    }
    sorted.sort();
    for pair in sorted.windows(2) {
        if let [earlier, later] = pair {
            if earlier.overlaps(later) {
                return Err(EngineError::integrity(format!(
                    "{}: effective ranges {} and {} overlap",
                    label, earlier, later
                )));
            }
        }
    }
    Ok(())
}
