//! Momentum oscillators.

use super::moving::{ema, sma, wilder, wma};
use super::{common_len, first_valid, mean, rolling, safe_div};

/// Relative Strength Index over Wilder-smoothed gains/losses. A period of
/// all-gains reads 100, all-losses 0.
pub fn rsi(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let mut out = vec![f64::NAN; len];
    if period == 0 || len < period + 1 {
        return out;
    }

    let mut gains = vec![f64::NAN; len];
    let mut losses = vec![f64::NAN; len];
    for i in 1..len {
        let change = xs[i] - xs[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }
    let avg_gain = wilder(&gains, period);
    let avg_loss = wilder(&losses, period);

    for i in 0..len {
        let (g, l) = (avg_gain[i], avg_loss[i]);
        if g.is_nan() || l.is_nan() {
            continue;
        }
        out[i] = if l == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + g / l)
        };
    }
    out
}

pub struct StochasticOutput {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

/// Fast stochastic %K with an SMA-smoothed %D.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
) -> StochasticOutput {
    let len = common_len(&[high, low, close]);
    let mut k = vec![f64::NAN; len];
    if k_period == 0 || len < k_period {
        return StochasticOutput {
            d: vec![f64::NAN; len],
            k,
        };
    }
    for i in (k_period - 1)..len {
        let window = i + 1 - k_period..=i;
        let hh = high[window.clone()].iter().cloned().fold(f64::NAN, f64::max);
        let ll = low[window].iter().cloned().fold(f64::NAN, f64::min);
        k[i] = safe_div(close[i] - ll, hh - ll) * 100.0;
    }
    let d = sma(&k, d_period);
    StochasticOutput { k, d }
}

/// Stochastic oscillator applied to RSI instead of price.
pub fn stochastic_rsi(
    xs: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> StochasticOutput {
    let r = rsi(xs, rsi_period);
    let len = r.len();
    let mut raw = vec![f64::NAN; len];
    let start = first_valid(&r);
    if stoch_period > 0 && start + stoch_period <= len {
        for i in (start + stoch_period - 1)..len {
            let window = &r[i + 1 - stoch_period..=i];
            let hh = window.iter().cloned().fold(f64::NAN, f64::max);
            let ll = window.iter().cloned().fold(f64::NAN, f64::min);
            raw[i] = safe_div(r[i] - ll, hh - ll) * 100.0;
        }
    }
    let k = sma(&raw, k_smooth);
    let d = sma(&k, d_smooth);
    StochasticOutput { k, d }
}

pub struct MacdOutput {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(xs: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdOutput {
    let fast_ema = ema(xs, fast);
    let slow_ema = ema(xs, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&macd_line, signal_period);
    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(signal.iter())
        .map(|(m, s)| m - s)
        .collect();
    MacdOutput {
        macd: macd_line,
        signal,
        histogram,
    }
}

/// Williams %R: 0 at the period high, −100 at the period low.
pub fn williams_r(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = common_len(&[high, low, close]);
    let mut out = vec![f64::NAN; len];
    if period == 0 || len < period {
        return out;
    }
    for i in (period - 1)..len {
        let window = i + 1 - period..=i;
        let hh = high[window.clone()].iter().cloned().fold(f64::NAN, f64::max);
        let ll = low[window].iter().cloned().fold(f64::NAN, f64::min);
        out[i] = safe_div(hh - close[i], hh - ll) * -100.0;
    }
    out
}

/// Commodity Channel Index over typical price with the 0.015 Lambert
/// scaling constant.
pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = common_len(&[high, low, close]);
    let tp: Vec<f64> = (0..len)
        .map(|i| (high[i] + low[i] + close[i]) / 3.0)
        .collect();
    rolling(&tp, period, |w| {
        let m = mean(w);
        let dev = w.iter().map(|v| (v - m).abs()).sum::<f64>() / w.len() as f64;
        safe_div(w[w.len() - 1] - m, 0.015 * dev)
    })
}

/// Rate of change, percent.
pub fn roc(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let mut out = vec![f64::NAN; len];
    for i in period..len {
        out[i] = safe_div(xs[i] - xs[i - period], xs[i - period]) * 100.0;
    }
    out
}

/// True Strength Index: double-EMA-smoothed momentum over double-EMA-smoothed
/// absolute momentum, percent.
pub fn tsi(xs: &[f64], long: usize, short: usize) -> Vec<f64> {
    let len = xs.len();
    let mut momentum = vec![f64::NAN; len];
    let mut abs_momentum = vec![f64::NAN; len];
    for i in 1..len {
        let m = xs[i] - xs[i - 1];
        momentum[i] = m;
        abs_momentum[i] = m.abs();
    }
    let num = ema(&ema(&momentum, long), short);
    let den = ema(&ema(&abs_momentum, long), short);
    num.iter()
        .zip(den.iter())
        .map(|(n, d)| safe_div(*n, *d) * 100.0)
        .collect()
}

/// Ultimate Oscillator over three buying-pressure horizons (7/14/28 weighted
/// 4/2/1 conventionally).
pub fn ultimate_oscillator(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    p1: usize,
    p2: usize,
    p3: usize,
) -> Vec<f64> {
    let len = common_len(&[high, low, close]);
    let mut bp = vec![f64::NAN; len];
    let mut tr = vec![f64::NAN; len];
    for i in 1..len {
        let true_low = low[i].min(close[i - 1]);
        let true_high = high[i].max(close[i - 1]);
        bp[i] = close[i] - true_low;
        tr[i] = true_high - true_low;
    }

    let avg = |n: usize| -> Vec<f64> {
        let sums_bp = rolling(&bp, n, |w| w.iter().sum());
        let sums_tr = rolling(&tr, n, |w| w.iter().sum());
        sums_bp
            .iter()
            .zip(sums_tr.iter())
            .map(|(b, t)| safe_div(*b, *t))
            .collect()
    };
    let (a1, a2, a3) = (avg(p1), avg(p2), avg(p3));
    (0..len)
        .map(|i| 100.0 * (4.0 * a1[i] + 2.0 * a2[i] + a3[i]) / 7.0)
        .collect()
}

/// Chande Momentum Oscillator: net directional movement over total movement.
pub fn cmo(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let mut up = vec![f64::NAN; len];
    let mut down = vec![f64::NAN; len];
    for i in 1..len {
        let change = xs[i] - xs[i - 1];
        up[i] = change.max(0.0);
        down[i] = (-change).max(0.0);
    }
    let sum_up = rolling(&up, period, |w| w.iter().sum());
    let sum_down = rolling(&down, period, |w| w.iter().sum());
    sum_up
        .iter()
        .zip(sum_down.iter())
        .map(|(u, d)| safe_div(u - d, u + d) * 100.0)
        .collect()
}

/// Know Sure Thing: weighted sum of four smoothed rate-of-change curves.
#[allow(clippy::too_many_arguments)]
pub fn kst(
    xs: &[f64],
    roc1: usize,
    roc2: usize,
    roc3: usize,
    roc4: usize,
    sma1: usize,
    sma2: usize,
    sma3: usize,
    sma4: usize,
) -> Vec<f64> {
    let r1 = sma(&roc(xs, roc1), sma1);
    let r2 = sma(&roc(xs, roc2), sma2);
    let r3 = sma(&roc(xs, roc3), sma3);
    let r4 = sma(&roc(xs, roc4), sma4);
    (0..xs.len())
        .map(|i| r1[i] + 2.0 * r2[i] + 3.0 * r3[i] + 4.0 * r4[i])
        .collect()
}

/// Schaff Trend Cycle: MACD run through two stochastic passes, each smoothed
/// with a 0.5 factor.
pub fn stc(xs: &[f64], fast: usize, slow: usize, cycle: usize) -> Vec<f64> {
    let m = macd(xs, fast, slow, 1).macd;

    let stoch_of = |src: &[f64]| -> Vec<f64> {
        let len = src.len();
        let mut out = vec![f64::NAN; len];
        let start = first_valid(src);
        if cycle == 0 || start + cycle > len {
            return out;
        }
        let mut prev = f64::NAN;
        for i in (start + cycle - 1)..len {
            let window = &src[i + 1 - cycle..=i];
            let hh = window.iter().cloned().fold(f64::NAN, f64::max);
            let ll = window.iter().cloned().fold(f64::NAN, f64::min);
            let raw = safe_div(src[i] - ll, hh - ll) * 100.0;
            prev = if prev.is_nan() { raw } else { prev + 0.5 * (raw - prev) };
            out[i] = prev;
        }
        out
    };

    stoch_of(&stoch_of(&m))
}

/// Percentage Price Oscillator: MACD normalized by the slow EMA.
pub fn ppo(xs: &[f64], fast: usize, slow: usize) -> Vec<f64> {
    let fast_ema = ema(xs, fast);
    let slow_ema = ema(xs, slow);
    fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| safe_div(f - s, *s) * 100.0)
        .collect()
}

/// Relative Vigor Index: symmetrically weighted close-open vigor against
/// the bar range, SMA-accumulated over `period`.
pub fn rvi(open: &[f64], high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = common_len(&[open, high, low, close]);
    let swma = |src: &dyn Fn(usize) -> f64, i: usize| -> f64 {
        (src(i) + 2.0 * src(i - 1) + 2.0 * src(i - 2) + src(i - 3)) / 6.0
    };
    let mut num = vec![f64::NAN; len];
    let mut den = vec![f64::NAN; len];
    for i in 3..len {
        num[i] = swma(&|j| close[j] - open[j], i);
        den[i] = swma(&|j| high[j] - low[j], i);
    }
    let num_sum = rolling(&num, period, |w| w.iter().sum());
    let den_sum = rolling(&den, period, |w| w.iter().sum());
    num_sum
        .iter()
        .zip(den_sum.iter())
        .map(|(n, d)| safe_div(*n, *d))
        .collect()
}

/// Coppock curve: WMA of the sum of two long rate-of-change curves.
pub fn coppock(xs: &[f64], roc_long: usize, roc_short: usize, wma_period: usize) -> Vec<f64> {
    let long = roc(xs, roc_long);
    let short = roc(xs, roc_short);
    let combined: Vec<f64> = long.iter().zip(short.iter()).map(|(a, b)| a + b).collect();
    wma(&combined, wma_period)
}
