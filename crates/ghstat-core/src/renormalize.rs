//! Percentage renormalization with largest-remainder apportionment.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hundredths of a percent in a whole.
const TOTAL_UNITS: i64 = 10_000;

/// One named share of a whole.
///
/// Fields other than `name`, `percent` and `text` are kept in `extra` and
/// pass through renormalization untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentItem {
    /// Category name.
    #[serde(default)]
    pub name: String,
    /// Share of the whole, 0–100.
    #[serde(default)]
    pub percent: f64,
    /// Human-readable label, e.g. `"3 hrs 12 mins"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Any other fields from the source.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PercentItem {
    /// An item with no label or extra fields.
    pub fn new(name: impl Into<String>, percent: f64) -> Self {
        Self {
            name: name.into(),
            percent,
            text: None,
            extra: Map::new(),
        }
    }

    /// Whether this is the catch-all bucket.
    pub fn is_other(&self) -> bool {
        self.name.eq_ignore_ascii_case("other")
    }
}

/// Drop the catch-all bucket and rescale the rest to sum to exactly 100.00.
///
/// Shares are truncated to hundredths of a percent; the hundredths lost to
/// truncation go one each to the items with the largest remainders, ties
/// broken by larger share and then by earlier position. Returns an empty
/// list when nothing but catch-all remains or the remaining sum is not
/// positive.
pub fn renormalize(items: &[PercentItem]) -> Vec<PercentItem> {
    let mut kept: Vec<PercentItem> = items.iter().filter(|i| !i.is_other()).cloned().collect();
    let sum: f64 = kept.iter().map(|i| i.percent).sum();
    if kept.is_empty() || sum.is_nan() || sum <= 0.0 {
        return Vec::new();
    }

    let shares: Vec<f64> = kept.iter().map(|i| i.percent / sum * 100.0).collect();
    let scaled: Vec<f64> = shares.iter().map(|s| s * 100.0).collect();
    #[allow(clippy::cast_possible_truncation)]
    let mut units: Vec<i64> = scaled.iter().map(|s| s.trunc() as i64).collect();

    let shortfall = TOTAL_UNITS - units.iter().sum::<i64>();
    if shortfall > 0 {
        let mut order: Vec<usize> = (0..kept.len()).collect();
        order.sort_by(|&a, &b| {
            let frac_a = scaled[a] - scaled[a].trunc();
            let frac_b = scaled[b] - scaled[b].trunc();
            frac_b
                .partial_cmp(&frac_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| shares[b].partial_cmp(&shares[a]).unwrap_or(Ordering::Equal))
                .then_with(|| a.cmp(&b))
        });
        for slot in order.iter().cycle().take(usize::try_from(shortfall).unwrap_or(0)) {
            units[*slot] += 1;
        }
    }

    for (item, unit) in kept.iter_mut().zip(units) {
        #[allow(clippy::cast_precision_loss)]
        let percent = unit as f64 / 100.0;
        item.percent = percent;
    }
    kept
}
