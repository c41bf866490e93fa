//! Trend and structure indicators.

use super::moving::{ema, sma, wilder};
use super::volatility::true_range;
use super::{common_len, mean, rolling, safe_div, shift_back, shift_forward, stdev};

pub struct AdxOutput {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

/// Average Directional Index with the directional lines, Wilder-smoothed
/// throughout.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> AdxOutput {
    let len = common_len(&[high, low, close]);
    let mut plus_dm = vec![f64::NAN; len];
    let mut minus_dm = vec![f64::NAN; len];
    for i in 1..len {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    // Blank the first TR so the smoothing window lines up with the DM
    // series, which only exists from the second bar.
    let mut tr = true_range(high, low, close);
    if let Some(first) = tr.first_mut() {
        *first = f64::NAN;
    }
    let smoothed_tr = wilder(&tr, period);
    let smoothed_plus = wilder(&plus_dm, period);
    let smoothed_minus = wilder(&minus_dm, period);

    let mut plus_di = vec![f64::NAN; len];
    let mut minus_di = vec![f64::NAN; len];
    let mut dx = vec![f64::NAN; len];
    for i in 0..len {
        if smoothed_plus[i].is_nan() || smoothed_minus[i].is_nan() || smoothed_tr[i].is_nan() {
            continue;
        }
        plus_di[i] = safe_div(smoothed_plus[i], smoothed_tr[i]) * 100.0;
        minus_di[i] = safe_div(smoothed_minus[i], smoothed_tr[i]) * 100.0;
        dx[i] = safe_div((plus_di[i] - minus_di[i]).abs(), plus_di[i] + minus_di[i]) * 100.0;
    }
    let adx = wilder(&dx, period);
    AdxOutput {
        adx,
        plus_di,
        minus_di,
    }
}

/// Parabolic SAR with the conventional 0.02 step / 0.2 cap acceleration.
pub fn parabolic_sar(high: &[f64], low: &[f64], af_step: f64, af_max: f64) -> Vec<f64> {
    let len = common_len(&[high, low]);
    let mut out = vec![f64::NAN; len];
    if len < 2 {
        return out;
    }

    let mut long = high[1] + low[1] > high[0] + low[0];
    let mut sar = if long { low[0] } else { high[0] };
    let mut extreme = if long { high[1] } else { low[1] };
    let mut af = af_step;

    out[1] = sar;
    for i in 2..len {
        sar += af * (extreme - sar);
        if long {
            // SAR may not enter the prior two bars' range.
            sar = sar.min(low[i - 1]).min(low[i - 2]);
            if low[i] < sar {
                long = false;
                sar = extreme;
                extreme = low[i];
                af = af_step;
            } else if high[i] > extreme {
                extreme = high[i];
                af = (af + af_step).min(af_max);
            }
        } else {
            sar = sar.max(high[i - 1]).max(high[i - 2]);
            if high[i] > sar {
                long = true;
                sar = extreme;
                extreme = high[i];
                af = af_step;
            } else if low[i] < extreme {
                extreme = low[i];
                af = (af + af_step).min(af_max);
            }
        }
        out[i] = sar;
    }
    out
}

pub struct IchimokuOutput {
    pub tenkan: Vec<f64>,
    pub kijun: Vec<f64>,
    /// Projected forward by the kijun period.
    pub span_a: Vec<f64>,
    pub span_b: Vec<f64>,
    /// Close displaced backward by the kijun period.
    pub chikou: Vec<f64>,
}

fn midline(high: &[f64], low: &[f64], period: usize) -> Vec<f64> {
    let hh = rolling(high, period, |w| w.iter().cloned().fold(f64::NAN, f64::max));
    let ll = rolling(low, period, |w| w.iter().cloned().fold(f64::NAN, f64::min));
    hh.iter().zip(ll.iter()).map(|(h, l)| (h + l) / 2.0).collect()
}

pub fn ichimoku(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    tenkan_period: usize,
    kijun_period: usize,
    span_b_period: usize,
) -> IchimokuOutput {
    let tenkan = midline(high, low, tenkan_period);
    let kijun = midline(high, low, kijun_period);
    let raw_a: Vec<f64> = tenkan
        .iter()
        .zip(kijun.iter())
        .map(|(t, k)| (t + k) / 2.0)
        .collect();
    let span_a = shift_forward(&raw_a, kijun_period);
    let span_b = shift_forward(&midline(high, low, span_b_period), kijun_period);
    let chikou = shift_back(close, kijun_period);
    IchimokuOutput {
        tenkan,
        kijun,
        span_a,
        span_b,
        chikou,
    }
}

pub struct AroonOutput {
    pub up: Vec<f64>,
    pub down: Vec<f64>,
}

/// Aroon: bars since the period extreme, rescaled to 0..100.
pub fn aroon(high: &[f64], low: &[f64], period: usize) -> AroonOutput {
    let len = common_len(&[high, low]);
    let mut up = vec![f64::NAN; len];
    let mut down = vec![f64::NAN; len];
    if period == 0 || len < period + 1 {
        return AroonOutput { up, down };
    }
    for i in period..len {
        let window = &high[i - period..=i];
        let max_offset = window
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(j, _)| j)
            .unwrap_or(0);
        up[i] = 100.0 * max_offset as f64 / period as f64;

        let window = &low[i - period..=i];
        let min_offset = window
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(j, _)| j)
            .unwrap_or(0);
        down[i] = 100.0 * min_offset as f64 / period as f64;
    }
    AroonOutput { up, down }
}

pub struct VortexOutput {
    pub plus: Vec<f64>,
    pub minus: Vec<f64>,
}

pub fn vortex(high: &[f64], low: &[f64], close: &[f64], period: usize) -> VortexOutput {
    let len = common_len(&[high, low, close]);
    let mut vm_plus = vec![f64::NAN; len];
    let mut vm_minus = vec![f64::NAN; len];
    let tr = true_range(high, low, close);
    let mut tr1 = vec![f64::NAN; len];
    for i in 1..len {
        vm_plus[i] = (high[i] - low[i - 1]).abs();
        vm_minus[i] = (low[i] - high[i - 1]).abs();
        tr1[i] = tr[i];
    }
    let sum_plus = rolling(&vm_plus, period, |w| w.iter().sum());
    let sum_minus = rolling(&vm_minus, period, |w| w.iter().sum());
    let sum_tr = rolling(&tr1, period, |w| w.iter().sum());
    let plus = sum_plus
        .iter()
        .zip(sum_tr.iter())
        .map(|(v, t)| safe_div(*v, *t))
        .collect();
    let minus = sum_minus
        .iter()
        .zip(sum_tr.iter())
        .map(|(v, t)| safe_div(*v, *t))
        .collect();
    VortexOutput { plus, minus }
}

pub struct AlligatorOutput {
    pub jaw: Vec<f64>,
    pub teeth: Vec<f64>,
    pub lips: Vec<f64>,
}

/// Williams Alligator: smoothed median-price lines displaced forward by
/// their conventional offsets (13/8, 8/5, 5/3).
pub fn alligator(high: &[f64], low: &[f64]) -> AlligatorOutput {
    let len = common_len(&[high, low]);
    let median: Vec<f64> = (0..len).map(|i| (high[i] + low[i]) / 2.0).collect();
    AlligatorOutput {
        jaw: shift_forward(&wilder(&median, 13), 8),
        teeth: shift_forward(&wilder(&median, 8), 5),
        lips: shift_forward(&wilder(&median, 5), 3),
    }
}

/// Balance of power: close-open displacement over the bar range.
pub fn balance_of_power(open: &[f64], high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = common_len(&[open, high, low, close]);
    (0..len)
        .map(|i| safe_div(close[i] - open[i], high[i] - low[i]))
        .collect()
}

pub struct HeikinAshiOutput {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
}

/// Heikin-Ashi OHLC reconstruction.
pub fn heikin_ashi(open: &[f64], high: &[f64], low: &[f64], close: &[f64]) -> HeikinAshiOutput {
    let len = common_len(&[open, high, low, close]);
    let mut ha_open = vec![f64::NAN; len];
    let mut ha_high = vec![f64::NAN; len];
    let mut ha_low = vec![f64::NAN; len];
    let mut ha_close = vec![f64::NAN; len];
    for i in 0..len {
        ha_close[i] = (open[i] + high[i] + low[i] + close[i]) / 4.0;
        ha_open[i] = if i == 0 {
            (open[0] + close[0]) / 2.0
        } else {
            (ha_open[i - 1] + ha_close[i - 1]) / 2.0
        };
        ha_high[i] = high[i].max(ha_open[i]).max(ha_close[i]);
        ha_low[i] = low[i].min(ha_open[i]).min(ha_close[i]);
    }
    HeikinAshiOutput {
        open: ha_open,
        high: ha_high,
        low: ha_low,
        close: ha_close,
    }
}

pub struct ElderRayOutput {
    pub bull: Vec<f64>,
    pub bear: Vec<f64>,
}

/// Elder Ray: bar extremes relative to an EMA baseline.
pub fn elder_ray(high: &[f64], low: &[f64], close: &[f64], period: usize) -> ElderRayOutput {
    let baseline = ema(close, period);
    let len = common_len(&[high, low, &baseline]);
    let bull = (0..len).map(|i| high[i] - baseline[i]).collect();
    let bear = (0..len).map(|i| low[i] - baseline[i]).collect();
    ElderRayOutput { bull, bear }
}

/// Detrended price oscillator: price against a displaced SMA.
pub fn dpo(xs: &[f64], period: usize) -> Vec<f64> {
    let len = xs.len();
    let ma = sma(xs, period);
    let shift = period / 2 + 1;
    let mut out = vec![f64::NAN; len];
    for i in 0..len {
        if i >= shift && !ma[i - shift].is_nan() {
            out[i] = xs[i] - ma[i - shift];
        }
    }
    out
}

fn linreg_window(w: &[f64]) -> (f64, f64) {
    // x = 0..n-1, least squares over the window.
    let n = w.len() as f64;
    let sum_x = (n - 1.0) * n / 2.0;
    let sum_x2 = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
    let sum_y: f64 = w.iter().sum();
    let sum_xy: f64 = w.iter().enumerate().map(|(j, v)| j as f64 * v).sum();
    let denom = n * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

/// Rolling linear-regression value evaluated at the window's last bar.
pub fn linreg(xs: &[f64], period: usize) -> Vec<f64> {
    rolling(xs, period, |w| {
        let (slope, intercept) = linreg_window(w);
        intercept + slope * (w.len() as f64 - 1.0)
    })
}

/// Rolling linear-regression slope.
pub fn linreg_slope(xs: &[f64], period: usize) -> Vec<f64> {
    rolling(xs, period, |w| linreg_window(w).0)
}

/// Rolling Pearson correlation of two sequences.
pub fn correlation(xs: &[f64], ys: &[f64], period: usize) -> Vec<f64> {
    let len = common_len(&[xs, ys]);
    let mut out = vec![f64::NAN; len];
    if period == 0 || len < period {
        return out;
    }
    for i in (period - 1)..len {
        let wx = &xs[i + 1 - period..=i];
        let wy = &ys[i + 1 - period..=i];
        if wx.iter().chain(wy.iter()).any(|v| v.is_nan()) {
            continue;
        }
        let mx = mean(wx);
        let my = mean(wy);
        let mut cov = 0.0;
        let mut var_x = 0.0;
        let mut var_y = 0.0;
        for j in 0..period {
            let dx = wx[j] - mx;
            let dy = wy[j] - my;
            cov += dx * dy;
            var_x += dx * dx;
            var_y += dy * dy;
        }
        out[i] = safe_div(cov, (var_x * var_y).sqrt());
    }
    out
}

/// Rolling standard error of the mean.
pub fn std_error(xs: &[f64], period: usize) -> Vec<f64> {
    rolling(xs, period, |w| stdev(w) / (w.len() as f64).sqrt())
}

/// Rolling population standard deviation.
pub fn std_dev(xs: &[f64], period: usize) -> Vec<f64> {
    rolling(xs, period, stdev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending() -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let close: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        (high, low, close)
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let (high, low, close) = trending();
        let out = adx(&high, &low, &close, 14);
        let i = 59;
        assert!(out.plus_di[i] > out.minus_di[i]);
        assert!(out.adx[i] > 25.0, "adx = {}", out.adx[i]);
    }

    #[test]
    fn test_parabolic_sar_below_price_in_uptrend() {
        let (high, low, _) = trending();
        let out = parabolic_sar(&high, &low, 0.02, 0.2);
        for i in 5..60 {
            assert!(out[i] < low[i], "sar {} >= low {} at {}", out[i], low[i], i);
        }
    }

    #[test]
    fn test_ichimoku_shapes() {
        let (high, low, close) = trending();
        let out = ichimoku(&high, &low, &close, 9, 26, 52);
        // Tenkan midline of a linear trend sits between the window extremes.
        assert!(!out.tenkan[20].is_nan());
        // Span A is displaced forward: first 26 + warmup slots NaN.
        assert!(out.span_a[30].is_nan());
        assert!(!out.span_a[59].is_nan());
        // Chikou is close displaced backward.
        assert_eq!(out.chikou[0], close[26]);
        assert!(out.chikou[59].is_nan());
    }

    #[test]
    fn test_aroon_up_pegged_in_uptrend() {
        let (high, low, _) = trending();
        let out = aroon(&high, &low, 25);
        // New highs every bar: the period max is always the newest bar.
        assert_eq!(out.up[59], 100.0);
        assert_eq!(out.down[59], 0.0);
    }

    #[test]
    fn test_vortex_plus_dominates_uptrend() {
        let (high, low, close) = trending();
        let out = vortex(&high, &low, &close, 14);
        assert!(out.plus[59] > out.minus[59]);
    }

    #[test]
    fn test_balance_of_power_bullish_bar() {
        let out = balance_of_power(&[10.0], &[12.0], &[9.0], &[11.5]);
        assert!((out[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_balance_of_power_zero_range_is_nan() {
        let out = balance_of_power(&[10.0], &[10.0], &[10.0], &[10.0]);
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_heikin_ashi_first_bar() {
        let out = heikin_ashi(&[10.0], &[12.0], &[9.0], &[11.0]);
        assert_eq!(out.close[0], 10.5);
        assert_eq!(out.open[0], 10.5);
        assert_eq!(out.high[0], 12.0);
        assert_eq!(out.low[0], 9.0);
    }

    #[test]
    fn test_heikin_ashi_smooths_open() {
        let out = heikin_ashi(
            &[10.0, 11.0],
            &[12.0, 13.0],
            &[9.0, 10.0],
            &[11.0, 12.0],
        );
        // ha_open[1] = (ha_open[0] + ha_close[0]) / 2
        assert_eq!(out.open[1], 10.5);
    }

    #[test]
    fn test_elder_ray_signs_in_uptrend() {
        let (high, low, close) = trending();
        let out = elder_ray(&high, &low, &close, 13);
        assert!(out.bull[59] > 0.0);
    }

    #[test]
    fn test_linreg_exact_on_line() {
        let xs: Vec<f64> = (0..20).map(|i| 5.0 + 2.0 * i as f64).collect();
        let values = linreg(&xs, 10);
        let slopes = linreg_slope(&xs, 10);
        assert!((values[19] - xs[19]).abs() < 1e-9);
        assert!((slopes[19] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_perfect_and_inverse() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ys: Vec<f64> = (0..20).map(|i| 3.0 * i as f64 + 1.0).collect();
        let zs: Vec<f64> = (0..20).map(|i| -(i as f64)).collect();
        assert!((correlation(&xs, &ys, 10)[19] - 1.0).abs() < 1e-9);
        assert!((correlation(&xs, &zs, 10)[19] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_std_dev_and_error() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sd = std_dev(&xs, 5);
        assert!((sd[4] - 2.0_f64.sqrt()).abs() < 1e-12);
        let se = std_error(&xs, 5);
        assert!((se[4] - 2.0_f64.sqrt() / 5.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_dpo_flat_is_zero() {
        let xs = [7.0; 30];
        let out = dpo(&xs, 10);
        for v in out.iter().filter(|v| !v.is_nan()) {
            assert_eq!(*v, 0.0);
        }
    }

    #[test]
    fn test_alligator_lines_ordered_in_uptrend() {
        let (high, low, _) = trending();
        let out = alligator(&high, &low);
        // Lips (fastest, least displaced) above teeth above jaw late in a
        // steady uptrend.
        let i = 59;
        assert!(out.lips[i] > out.teeth[i]);
        assert!(out.teeth[i] > out.jaw[i]);
    }
}
