//! Moving-average family.

use super::{first_valid, mean, rolling};

/// Simple moving average.
pub fn sma(xs: &[f64], period: usize) -> Vec<f64> {
    rolling(xs, period, mean)
}

/// Exponential moving average, seeded with the SMA of the first full window
/// after the input's warm-up tail.
pub fn ema(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let mut out = vec![f64::NAN; len];
    if period == 0 {
        return out;
    }
    let start = first_valid(xs);
    if start + period > len {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = mean(&xs[start..start + period]);
    out[start + period - 1] = prev;
    for i in (start + period)..len {
        prev = alpha * xs[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Wilder's smoothing (RMA). Same recursion as EMA with `alpha = 1/period`;
/// the seed convention RSI, ATR and ADX share.
pub fn wilder(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let mut out = vec![f64::NAN; len];
    if period == 0 {
        return out;
    }
    let start = first_valid(xs);
    if start + period > len {
        return out;
    }
    let alpha = 1.0 / period as f64;
    let mut prev = mean(&xs[start..start + period]);
    out[start + period - 1] = prev;
    for i in (start + period)..len {
        prev = alpha * xs[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Linearly weighted moving average (most recent bar weighs `period`).
pub fn wma(xs: &[f64], period: usize) -> Vec<f64> {
    let denom = (period * (period + 1)) as f64 / 2.0;
    rolling(xs, period, move |w| {
        w.iter()
            .enumerate()
            .map(|(j, v)| (j as f64 + 1.0) * v)
            .sum::<f64>()
            / denom
    })
}

/// Hull moving average: `WMA(2·WMA(n/2) − WMA(n), √n)`.
pub fn hma(xs: &[f64], period: usize) -> Vec<f64> {
    if period < 2 {
        return vec![f64::NAN; xs.len()];
    }
    let half = wma(xs, period / 2);
    let full = wma(xs, period);
    let raw: Vec<f64> = half
        .iter()
        .zip(full.iter())
        .map(|(h, f)| 2.0 * h - f)
        .collect();
    wma(&raw, (period as f64).sqrt().round() as usize)
}

/// Arnaud Legoux moving average with the conventional
/// `offset = 0.85`, `sigma = 6` defaults.
pub fn alma(xs: &[f64], period: usize, offset: f64, sigma: f64) -> Vec<f64> {
    if period == 0 || sigma == 0.0 {
        return vec![f64::NAN; xs.len()];
    }
    let m = offset * (period as f64 - 1.0);
    let s = period as f64 / sigma;
    let weights: Vec<f64> = (0..period)
        .map(|j| (-((j as f64 - m) * (j as f64 - m)) / (2.0 * s * s)).exp())
        .collect();
    let norm: f64 = weights.iter().sum();
    rolling(xs, period, move |w| {
        w.iter().zip(weights.iter()).map(|(v, wt)| v * wt).sum::<f64>() / norm
    })
}

/// Triple exponential moving average: `3·e1 − 3·e2 + e3`.
pub fn tema(xs: &[f64], period: usize) -> Vec<f64> {
    let e1 = ema(xs, period);
    let e2 = ema(&e1, period);
    let e3 = ema(&e2, period);
    e1.iter()
        .zip(e2.iter())
        .zip(e3.iter())
        .map(|((a, b), c)| 3.0 * a - 3.0 * b + c)
        .collect()
}

/// Kaufman adaptive moving average. The efficiency ratio over `er_period`
/// interpolates the smoothing constant between the `fast` and `slow` EMA
/// constants; the output is seeded with the raw price at the first
/// computable index.
pub fn kama(xs: &[f64], er_period: usize, fast: usize, slow: usize) -> Vec<f64> {
    let len = xs.len();
    let mut out = vec![f64::NAN; len];
    if er_period == 0 || len < er_period {
        return out;
    }
    let fast_sc = 2.0 / (fast as f64 + 1.0);
    let slow_sc = 2.0 / (slow as f64 + 1.0);

    let mut prev = xs[er_period - 1];
    out[er_period - 1] = prev;
    for i in er_period..len {
        let change = (xs[i] - xs[i - er_period]).abs();
        let volatility: f64 = (i - er_period + 1..=i)
            .map(|j| (xs[j] - xs[j - 1]).abs())
            .sum();
        let er = if volatility == 0.0 {
            0.0
        } else {
            change / volatility
        };
        let sc = (er * (fast_sc - slow_sc) + slow_sc).powi(2);
        prev += sc * (xs[i] - prev);
        out[i] = prev;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nan_prefix(xs: &[f64]) -> usize {
        xs.iter().take_while(|v| v.is_nan()).count()
    }

    #[test]
    fn test_sma_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(nan_prefix(&out), 2);
        assert_eq!(&out[2..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ema_values() {
        // alpha = 0.5, seeded with sma([1,2,3]) = 2
        let out = ema(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(nan_prefix(&out), 2);
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 3.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn test_ema_chains_past_warmup_tail() {
        // ema over a series that itself has leading NaNs (e.g. an upstream
        // indicator's warm-up) must not poison everything.
        let upstream = [f64::NAN, f64::NAN, 1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ema(&upstream, 3);
        assert_eq!(nan_prefix(&out), 4);
        assert_eq!(out[4], 2.0);
        assert_eq!(out[6], 4.0);
    }

    #[test]
    fn test_wma_values() {
        let out = wma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(nan_prefix(&out), 1);
        assert!((out[1] - 5.0 / 3.0).abs() < 1e-12);
        assert!((out[2] - 8.0 / 3.0).abs() < 1e-12);
        assert!((out[3] - 11.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_wilder_matches_rsi_seed_convention() {
        let out = wilder(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(nan_prefix(&out), 1);
        assert_eq!(out[1], 3.0);
        assert_eq!(out[2], 0.5 * 6.0 + 0.5 * 3.0);
    }

    #[test]
    fn test_hma_converges_on_trend() {
        let xs: Vec<f64> = (1..=40).map(|i| i as f64).collect();
        let out = hma(&xs, 9);
        // On a pure linear trend the Hull MA tracks price almost exactly.
        assert!((out[39] - 40.0).abs() < 1.0);
    }

    #[test]
    fn test_alma_weights_sum_to_input_on_constant_series() {
        let xs = [5.0; 20];
        let out = alma(&xs, 9, 0.85, 6.0);
        assert_eq!(nan_prefix(&out), 8);
        for v in &out[8..] {
            assert!((v - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tema_warmup_is_three_stages() {
        let xs: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let out = tema(&xs, 4);
        // Three chained EMA(4) stages: 3 · (4 − 1) leading NaNs.
        assert_eq!(nan_prefix(&out), 9);
        // TEMA is lag-corrected: on a linear trend it sits on the price.
        assert!((out[19] - 20.0).abs() < 0.2);
    }

    #[test]
    fn test_kama_flat_market_holds() {
        let xs = [10.0; 15];
        let out = kama(&xs, 10, 2, 30);
        assert_eq!(nan_prefix(&out), 9);
        for v in &out[9..] {
            assert_eq!(*v, 10.0);
        }
    }

    #[test]
    fn test_kama_trending_market_follows() {
        let xs: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let out = kama(&xs, 10, 2, 30);
        // Perfect efficiency: KAMA chases price with the fast constant.
        assert!(out[39] > 30.0);
    }

    #[test]
    fn test_purity() {
        let xs = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let before = xs.clone();
        let a = sma(&xs, 3);
        let b = sma(&xs, 3);
        assert_eq!(xs, before);
        assert_eq!(a, b);
    }
}
