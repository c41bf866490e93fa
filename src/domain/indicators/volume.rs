//! Volume-weighted indicators and flow measures.

use super::moving::ema;
use super::{common_len, rolling, safe_div};

/// Session-less VWAP: cumulative typical-price volume over cumulative
/// volume from the start of the sequence.
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = common_len(&[high, low, close, volume]);
    let mut out = vec![f64::NAN; len];
    let mut pv_sum = 0.0;
    let mut v_sum = 0.0;
    for i in 0..len {
        let tp = (high[i] + low[i] + close[i]) / 3.0;
        pv_sum += tp * volume[i];
        v_sum += volume[i];
        out[i] = safe_div(pv_sum, v_sum);
    }
    out
}

/// On-balance volume.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = common_len(&[close, volume]);
    let mut out = vec![f64::NAN; len];
    if len == 0 {
        return out;
    }
    let mut acc = 0.0;
    out[0] = 0.0;
    for i in 1..len {
        if close[i] > close[i - 1] {
            acc += volume[i];
        } else if close[i] < close[i - 1] {
            acc -= volume[i];
        }
        out[i] = acc;
    }
    out
}

/// Money Flow Index: volume-weighted RSI analogue over typical price.
pub fn mfi(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    let len = common_len(&[high, low, close, volume]);
    let mut positive = vec![f64::NAN; len];
    let mut negative = vec![f64::NAN; len];
    let tp = |i: usize| (high[i] + low[i] + close[i]) / 3.0;
    for i in 1..len {
        let flow = tp(i) * volume[i];
        if tp(i) > tp(i - 1) {
            positive[i] = flow;
            negative[i] = 0.0;
        } else if tp(i) < tp(i - 1) {
            positive[i] = 0.0;
            negative[i] = flow;
        } else {
            positive[i] = 0.0;
            negative[i] = 0.0;
        }
    }
    let pos_sum = rolling(&positive, period, |w| w.iter().sum());
    let neg_sum = rolling(&negative, period, |w| w.iter().sum());
    pos_sum
        .iter()
        .zip(neg_sum.iter())
        .map(|(p, n)| {
            if p.is_nan() || n.is_nan() {
                f64::NAN
            } else if *n == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + p / n)
            }
        })
        .collect()
}

/// Close-location money flow multiplier for one bar.
fn money_flow_multiplier(high: f64, low: f64, close: f64) -> f64 {
    safe_div((close - low) - (high - close), high - low)
}

/// Per-bar money flow volume (non-cumulative).
pub fn money_flow_volume(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = common_len(&[high, low, close, volume]);
    (0..len)
        .map(|i| money_flow_multiplier(high[i], low[i], close[i]) * volume[i])
        .collect()
}

/// Accumulation/Distribution line: cumulative money flow volume. A zero-range
/// bar contributes nothing rather than NaN-poisoning the line.
pub fn accumulation_distribution(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
) -> Vec<f64> {
    let mfv = money_flow_volume(high, low, close, volume);
    let mut out = vec![f64::NAN; mfv.len()];
    let mut acc = 0.0;
    for (i, v) in mfv.iter().enumerate() {
        if !v.is_nan() {
            acc += v;
        }
        out[i] = acc;
    }
    out
}

/// Chaikin oscillator: fast/slow EMA spread of the A/D line.
pub fn chaikin_oscillator(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
    fast: usize,
    slow: usize,
) -> Vec<f64> {
    let ad = accumulation_distribution(high, low, close, volume);
    let f = ema(&ad, fast);
    let s = ema(&ad, slow);
    f.iter().zip(s.iter()).map(|(a, b)| a - b).collect()
}

/// Chaikin money flow: money flow volume over volume, both summed over
/// `period`.
pub fn chaikin_money_flow(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
    period: usize,
) -> Vec<f64> {
    let mfv = money_flow_volume(high, low, close, volume);
    let mfv_sum = rolling(&mfv, period, |w| w.iter().sum());
    let vol_sum = rolling(&volume[..mfv.len()], period, |w| w.iter().sum());
    mfv_sum
        .iter()
        .zip(vol_sum.iter())
        .map(|(m, v)| safe_div(*m, *v))
        .collect()
}

/// Raw single-bar force index: price change times volume.
pub fn force_index(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = common_len(&[close, volume]);
    let mut out = vec![f64::NAN; len];
    for i in 1..len {
        out[i] = (close[i] - close[i - 1]) * volume[i];
    }
    out
}

/// Elder's force index: EMA-smoothed raw force.
pub fn elder_force_index(close: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    ema(&force_index(close, volume), period)
}

/// Percentage spread between fast and slow volume EMAs.
pub fn volume_oscillator(volume: &[f64], fast: usize, slow: usize) -> Vec<f64> {
    let f = ema(volume, fast);
    let s = ema(volume, slow);
    f.iter()
        .zip(s.iter())
        .map(|(a, b)| safe_div(a - b, *b) * 100.0)
        .collect()
}

pub struct VolumeProfileOutput {
    /// Lower edge of each price bucket, ascending.
    pub levels: Vec<f64>,
    /// Total volume traded inside each bucket.
    pub volumes: Vec<f64>,
}

/// Histogram of traded volume by closing-price bucket over the whole input.
pub fn volume_profile(close: &[f64], volume: &[f64], buckets: usize) -> VolumeProfileOutput {
    let len = common_len(&[close, volume]);
    let clean: Vec<(f64, f64)> = (0..len)
        .map(|i| (close[i], volume[i]))
        .filter(|(c, v)| !c.is_nan() && !v.is_nan())
        .collect();
    if buckets == 0 || clean.is_empty() {
        return VolumeProfileOutput {
            levels: Vec::new(),
            volumes: Vec::new(),
        };
    }
    let min = clean.iter().map(|(c, _)| *c).fold(f64::INFINITY, f64::min);
    let max = clean.iter().map(|(c, _)| *c).fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / buckets as f64;
    let levels: Vec<f64> = (0..buckets).map(|b| min + b as f64 * width).collect();
    let mut volumes = vec![0.0; buckets];
    for (c, v) in clean {
        let idx = if width == 0.0 {
            0
        } else {
            (((c - min) / width) as usize).min(buckets - 1)
        };
        volumes[idx] += v;
    }
    VolumeProfileOutput { levels, volumes }
}

pub struct KlingerOutput {
    pub kvo: Vec<f64>,
    pub signal: Vec<f64>,
}

/// Klinger volume oscillator: trend-signed volume force, fast minus slow
/// EMA, with an EMA signal line.
pub fn klinger(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> KlingerOutput {
    let len = common_len(&[high, low, close, volume]);
    let mut vf = vec![f64::NAN; len];
    let hlc = |i: usize| high[i] + low[i] + close[i];

    let mut trend = 0.0;
    let mut cm = 0.0;
    let mut prev_dm = if len > 0 { high[0] - low[0] } else { 0.0 };
    for i in 1..len {
        let dm = high[i] - low[i];
        let new_trend = if hlc(i) > hlc(i - 1) { 1.0 } else { -1.0 };
        cm = if new_trend == trend { cm + dm } else { prev_dm + dm };
        trend = new_trend;
        prev_dm = dm;
        vf[i] = volume[i] * (2.0 * safe_div(dm, cm) - 1.0).abs() * trend * 100.0;
    }

    let kvo: Vec<f64> = ema(&vf, fast)
        .iter()
        .zip(ema(&vf, slow).iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&kvo, signal_period);
    KlingerOutput { kvo, signal }
}

/// Williams accumulation/distribution line.
pub fn williams_ad(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = common_len(&[high, low, close]);
    let mut out = vec![f64::NAN; len];
    if len == 0 {
        return out;
    }
    let mut acc = 0.0;
    out[0] = 0.0;
    for i in 1..len {
        if close[i] > close[i - 1] {
            acc += close[i] - low[i].min(close[i - 1]);
        } else if close[i] < close[i - 1] {
            acc -= high[i].max(close[i - 1]) - close[i];
        }
        out[i] = acc;
    }
    out
}

/// Ease of movement: midpoint displacement scaled by the bar's box ratio,
/// SMA-smoothed.
pub fn ease_of_movement(high: &[f64], low: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    let len = common_len(&[high, low, volume]);
    let mut raw = vec![f64::NAN; len];
    for i in 1..len {
        let mid_move = (high[i] + low[i]) / 2.0 - (high[i - 1] + low[i - 1]) / 2.0;
        let box_ratio = safe_div(volume[i] / 100_000_000.0, high[i] - low[i]);
        raw[i] = safe_div(mid_move, box_ratio);
    }
    rolling(&raw, period, super::mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vwap_single_bar_is_typical_price() {
        let out = vwap(&[12.0], &[10.0], &[11.0], &[5.0]);
        assert_eq!(out[0], 11.0);
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        // Bar 1: tp 10 vol 1; bar 2: tp 20 vol 3 -> (10 + 60) / 4 = 17.5
        let out = vwap(&[10.0, 20.0], &[10.0, 20.0], &[10.0, 20.0], &[1.0, 3.0]);
        assert_eq!(out[1], 17.5);
    }

    #[test]
    fn test_obv_accumulates_signed_volume() {
        let close = [10.0, 11.0, 10.5, 10.5, 12.0];
        let volume = [100.0, 200.0, 150.0, 80.0, 300.0];
        let out = obv(&close, &volume);
        assert_eq!(out, vec![0.0, 200.0, 50.0, 50.0, 350.0]);
    }

    #[test]
    fn test_mfi_bounds() {
        let high: Vec<f64> = (0..30).map(|i| (i as f64 * 0.9).sin() * 3.0 + 10.0).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 1.0).collect();
        let close: Vec<f64> = high.iter().map(|h| h - 0.5).collect();
        let volume = vec![100.0; 30];
        let out = mfi(&high, &low, &close, &volume, 14);
        for v in out.iter().filter(|v| !v.is_nan()) {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn test_ad_line_rises_on_closes_near_high() {
        let high = vec![10.0; 10];
        let low = vec![8.0; 10];
        let close = vec![9.9; 10];
        let volume = vec![100.0; 10];
        let out = accumulation_distribution(&high, &low, &close, &volume);
        assert!(out[9] > out[0]);
    }

    #[test]
    fn test_force_index_sign() {
        let out = force_index(&[10.0, 11.0, 10.0], &[100.0, 100.0, 100.0]);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 100.0);
        assert_eq!(out[2], -100.0);
    }

    #[test]
    fn test_volume_profile_buckets_cover_range() {
        let close = [1.0, 2.0, 3.0, 4.0, 5.0];
        let volume = [10.0, 10.0, 10.0, 10.0, 10.0];
        let out = volume_profile(&close, &volume, 4);
        assert_eq!(out.levels.len(), 4);
        assert_eq!(out.volumes.iter().sum::<f64>(), 50.0);
        // Max close lands in the last bucket.
        assert!(out.volumes[3] >= 10.0);
    }

    #[test]
    fn test_williams_ad_flat_stays_zero() {
        let xs = [10.0; 5];
        let out = williams_ad(&xs, &xs, &xs);
        assert_eq!(out, vec![0.0; 5]);
    }

    #[test]
    fn test_chaikin_money_flow_bounds() {
        let high: Vec<f64> = (0..30).map(|i| 10.0 + (i % 3) as f64).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 2.0).collect();
        let close: Vec<f64> = high.iter().map(|h| h - 1.0).collect();
        let volume = vec![50.0; 30];
        let out = chaikin_money_flow(&high, &low, &close, &volume, 20);
        for v in out.iter().filter(|v| !v.is_nan()) {
            assert!((-1.0..=1.0).contains(v));
        }
    }

    #[test]
    fn test_ease_of_movement_positive_on_upward_drift() {
        let high: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 1.0).collect();
        let volume = vec![1000.0; 30];
        let out = ease_of_movement(&high, &low, &volume, 14);
        assert!(out[29] > 0.0);
    }

    #[test]
    fn test_klinger_produces_signal_difference() {
        let high: Vec<f64> = (0..80).map(|i| 10.0 + (i as f64 * 0.3).sin() * 2.0 + 2.0).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 3.0).collect();
        let close: Vec<f64> = high.iter().map(|h| h - 1.5).collect();
        let volume = vec![500.0; 80];
        let out = klinger(&high, &low, &close, &volume, 34, 55, 13);
        assert!(!out.kvo[79].is_nan());
        assert!(!out.signal[79].is_nan());
    }
}
