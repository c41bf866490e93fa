//! Volatility bands, ranges and stops.

use super::moving::{ema, sma, wilder};
use super::{common_len, rolling, safe_div, stdev};

pub struct BandsOutput {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bollinger bands: SMA ± `mult` population standard deviations.
pub fn bollinger(xs: &[f64], period: usize, mult: f64) -> BandsOutput {
    let middle = sma(xs, period);
    let sd = rolling(xs, period, stdev);
    let upper: Vec<f64> = middle
        .iter()
        .zip(sd.iter())
        .map(|(m, s)| m + mult * s)
        .collect();
    let lower: Vec<f64> = middle
        .iter()
        .zip(sd.iter())
        .map(|(m, s)| m - mult * s)
        .collect();
    BandsOutput {
        middle,
        upper,
        lower,
    }
}

/// True range series: `max(h, prev_close) - min(l, prev_close)`; the first
/// bar falls back to `h - l`.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = common_len(&[high, low, close]);
    let mut out = vec![f64::NAN; len];
    if len == 0 {
        return out;
    }
    out[0] = high[0] - low[0];
    for i in 1..len {
        out[i] = (high[i].max(close[i - 1])) - (low[i].min(close[i - 1]));
    }
    out
}

/// Average True Range, Wilder-smoothed.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    wilder(&true_range(high, low, close), period)
}

/// Keltner channel: EMA midline ± `mult` ATRs.
pub fn keltner(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    mult: f64,
) -> BandsOutput {
    let middle = ema(close, period);
    let range = atr(high, low, close, period);
    let upper: Vec<f64> = middle
        .iter()
        .zip(range.iter())
        .map(|(m, r)| m + mult * r)
        .collect();
    let lower: Vec<f64> = middle
        .iter()
        .zip(range.iter())
        .map(|(m, r)| m - mult * r)
        .collect();
    BandsOutput {
        middle,
        upper,
        lower,
    }
}

/// Donchian channel over the trailing `period` bars.
pub fn donchian(high: &[f64], low: &[f64], period: usize) -> BandsOutput {
    let upper = rolling(high, period, |w| w.iter().cloned().fold(f64::NAN, f64::max));
    let lower = rolling(low, period, |w| w.iter().cloned().fold(f64::NAN, f64::min));
    let middle: Vec<f64> = upper
        .iter()
        .zip(lower.iter())
        .map(|(u, l)| (u + l) / 2.0)
        .collect();
    BandsOutput {
        middle,
        upper,
        lower,
    }
}

/// Price channel: trailing extremes of the *previous* `period` bars, so the
/// current bar can break its own channel.
pub fn price_channel(high: &[f64], low: &[f64], period: usize) -> BandsOutput {
    let len = common_len(&[high, low]);
    let mut upper = vec![f64::NAN; len];
    let mut lower = vec![f64::NAN; len];
    for i in period..len {
        let window = i - period..i;
        upper[i] = high[window.clone()].iter().cloned().fold(f64::NAN, f64::max);
        lower[i] = low[window].iter().cloned().fold(f64::NAN, f64::min);
    }
    let middle: Vec<f64> = upper
        .iter()
        .zip(lower.iter())
        .map(|(u, l)| (u + l) / 2.0)
        .collect();
    BandsOutput {
        middle,
        upper,
        lower,
    }
}

pub struct SupertrendOutput {
    pub line: Vec<f64>,
    /// +1 while the trend is up (line below price), −1 while down.
    pub direction: Vec<f64>,
}

/// ATR-based trend flip. Bands ratchet toward price and the active band
/// flips when the close crosses it.
pub fn supertrend(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    mult: f64,
) -> SupertrendOutput {
    let len = common_len(&[high, low, close]);
    let range = atr(high, low, close, period);
    let mut line = vec![f64::NAN; len];
    let mut direction = vec![f64::NAN; len];

    let mut upper_band = f64::NAN;
    let mut lower_band = f64::NAN;
    let mut dir = 1.0;

    for i in 0..len {
        if range[i].is_nan() {
            continue;
        }
        let mid = (high[i] + low[i]) / 2.0;
        let basic_upper = mid + mult * range[i];
        let basic_lower = mid - mult * range[i];

        let prev_close = if i == 0 { close[i] } else { close[i - 1] };
        // Ratchet: bands only tighten while price respects them.
        upper_band = if upper_band.is_nan() || basic_upper < upper_band || prev_close > upper_band {
            basic_upper
        } else {
            upper_band
        };
        lower_band = if lower_band.is_nan() || basic_lower > lower_band || prev_close < lower_band {
            basic_lower
        } else {
            lower_band
        };

        if dir > 0.0 && close[i] < lower_band {
            dir = -1.0;
        } else if dir < 0.0 && close[i] > upper_band {
            dir = 1.0;
        }
        direction[i] = dir;
        line[i] = if dir > 0.0 { lower_band } else { upper_band };
    }

    SupertrendOutput { line, direction }
}

pub struct ChandelierOutput {
    pub long: Vec<f64>,
    pub short: Vec<f64>,
}

/// Chandelier exit: trailing extreme offset by `mult` ATRs.
pub fn chandelier_exit(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    mult: f64,
) -> ChandelierOutput {
    let range = atr(high, low, close, period);
    let hh = rolling(high, period, |w| w.iter().cloned().fold(f64::NAN, f64::max));
    let ll = rolling(low, period, |w| w.iter().cloned().fold(f64::NAN, f64::min));
    let long: Vec<f64> = hh
        .iter()
        .zip(range.iter())
        .map(|(h, r)| h - mult * r)
        .collect();
    let short: Vec<f64> = ll
        .iter()
        .zip(range.iter())
        .map(|(l, r)| l + mult * r)
        .collect();
    ChandelierOutput { long, short }
}

pub struct ChandeKrollOutput {
    pub stop_long: Vec<f64>,
    pub stop_short: Vec<f64>,
}

/// Chande-Kroll stop: preliminary ATR-offset stops re-extremed over `q`.
pub fn chande_kroll_stop(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    p: usize,
    x: f64,
    q: usize,
) -> ChandeKrollOutput {
    let range = atr(high, low, close, p);
    let hh = rolling(high, p, |w| w.iter().cloned().fold(f64::NAN, f64::max));
    let ll = rolling(low, p, |w| w.iter().cloned().fold(f64::NAN, f64::min));

    let prelim_long: Vec<f64> = hh
        .iter()
        .zip(range.iter())
        .map(|(h, r)| h - x * r)
        .collect();
    let prelim_short: Vec<f64> = ll
        .iter()
        .zip(range.iter())
        .map(|(l, r)| l + x * r)
        .collect();

    let stop_long = rolling(&prelim_long, q, |w| {
        w.iter().cloned().fold(f64::NAN, f64::max)
    });
    let stop_short = rolling(&prelim_short, q, |w| {
        w.iter().cloned().fold(f64::NAN, f64::min)
    });
    ChandeKrollOutput {
        stop_long,
        stop_short,
    }
}

/// Mass index: range-EMA ratio summed over `period`, spotting reversal
/// bulges around 27.
pub fn mass_index(high: &[f64], low: &[f64], ema_period: usize, period: usize) -> Vec<f64> {
    let len = common_len(&[high, low]);
    let span: Vec<f64> = (0..len).map(|i| high[i] - low[i]).collect();
    let single = ema(&span, ema_period);
    let double = ema(&single, ema_period);
    let ratio: Vec<f64> = single
        .iter()
        .zip(double.iter())
        .map(|(s, d)| safe_div(*s, *d))
        .collect();
    rolling(&ratio, period, |w| w.iter().sum())
}

/// Bollinger %B: where the price sits inside the bands (0 at lower, 1 at
/// upper).
pub fn percent_b(xs: &[f64], period: usize, mult: f64) -> Vec<f64> {
    let bands = bollinger(xs, period, mult);
    (0..xs.len())
        .map(|i| safe_div(xs[i] - bands.lower[i], bands.upper[i] - bands.lower[i]))
        .collect()
}

/// Bollinger band width normalized by the midline.
pub fn bandwidth(xs: &[f64], period: usize, mult: f64) -> Vec<f64> {
    let bands = bollinger(xs, period, mult);
    (0..xs.len())
        .map(|i| safe_div(bands.upper[i] - bands.lower[i], bands.middle[i]))
        .collect()
}

/// Rolling standard deviation of single-bar percentage returns.
pub fn volatility_index(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let mut returns = vec![f64::NAN; len];
    for i in 1..len {
        returns[i] = safe_div(xs[i] - xs[i - 1], xs[i - 1]);
    }
    rolling(&returns, period, stdev)
}
