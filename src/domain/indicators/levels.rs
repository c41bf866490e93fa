//! Support/resistance level calculators.

use super::common_len;
use std::collections::BTreeMap;

pub struct PivotPointsOutput {
    pub pivot: Vec<f64>,
    pub r1: Vec<f64>,
    pub r2: Vec<f64>,
    pub r3: Vec<f64>,
    pub s1: Vec<f64>,
    pub s2: Vec<f64>,
    pub s3: Vec<f64>,
}

/// Classic floor-trader pivots computed from the *prior* bar, so each output
/// position holds the levels in force during that bar.
pub fn pivot_points(high: &[f64], low: &[f64], close: &[f64]) -> PivotPointsOutput {
    let len = common_len(&[high, low, close]);
    let mut out = PivotPointsOutput {
        pivot: vec![f64::NAN; len],
        r1: vec![f64::NAN; len],
        r2: vec![f64::NAN; len],
        r3: vec![f64::NAN; len],
        s1: vec![f64::NAN; len],
        s2: vec![f64::NAN; len],
        s3: vec![f64::NAN; len],
    };
    for i in 1..len {
        let (h, l, c) = (high[i - 1], low[i - 1], close[i - 1]);
        let p = (h + l + c) / 3.0;
        out.pivot[i] = p;
        out.r1[i] = 2.0 * p - l;
        out.s1[i] = 2.0 * p - h;
        out.r2[i] = p + (h - l);
        out.s2[i] = p - (h - l);
        out.r3[i] = h + 2.0 * (p - l);
        out.s3[i] = l - 2.0 * (h - p);
    }
    out
}

/// Canonical retracement ratio keys, in descending level order for a swing
/// measured from `low` to `high`.
pub const FIB_LEVELS: [(&str, f64); 5] = [
    ("23.6", 0.236),
    ("38.2", 0.382),
    ("50.0", 0.5),
    ("61.8", 0.618),
    ("78.6", 0.786),
];

/// Fibonacci retracement levels for a completed swing. Keys are the fixed
/// strings `"23.6"`, `"38.2"`, `"50.0"`, `"61.8"`, `"78.6"`.
pub fn fibonacci_retracement(high: f64, low: f64) -> BTreeMap<String, f64> {
    let span = high - low;
    FIB_LEVELS
        .iter()
        .map(|(key, ratio)| (key.to_string(), high - span * ratio))
        .collect()
}
