use crate::domain::market::types::Kline;
use std::collections::VecDeque;

/// Minimum ring capacity regardless of observed indicator lookback.
pub const MIN_CAPACITY: usize = 512;

/// Bounded, strictly time-ordered kline history for one (symbol, interval).
///
/// Appends that would break `open_time` monotonicity are rejected: late or
/// duplicate bars never enter the buffer. When full, the oldest bar is
/// evicted.
#[derive(Debug, Clone)]
pub struct KlineBuffer {
    klines: VecDeque<Kline>,
    capacity: usize,
}

/// Outcome of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Accepted,
    /// `open_time` was not strictly greater than the latest buffered bar.
    RejectedOutOfOrder,
}

impl KlineBuffer {
    pub fn new(lookback_hint: usize) -> Self {
        let capacity = lookback_hint.max(MIN_CAPACITY);
        Self {
            klines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, kline: Kline) -> Append {
        if let Some(last) = self.klines.back()
            && kline.open_time <= last.open_time
        {
            return Append::RejectedOutOfOrder;
        }
        if self.klines.len() == self.capacity {
            self.klines.pop_front();
        }
        self.klines.push_back(kline);
        Append::Accepted
    }

    pub fn len(&self) -> usize {
        self.klines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.klines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Kline> {
        self.klines.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kline> {
        self.klines.iter()
    }

    /// Ordered column extraction for the script host's parallel sequences.
    pub fn column<F: Fn(&Kline) -> f64>(&self, f: F) -> Vec<f64> {
        self.klines.iter().map(f).collect()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.column(|k| k.open)
    }

    pub fn highs(&self) -> Vec<f64> {
        self.column(|k| k.high)
    }

    pub fn lows(&self) -> Vec<f64> {
        self.column(|k| k.low)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.column(|k| k.close)
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.column(|k| k.volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::types::Interval;

    fn kline(open_time: i64, close: f64) -> Kline {
        Kline {
            symbol: "BTC/USDT".to_string(),
            interval: Interval::OneMinute,
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_push_keeps_monotone_order() {
        let mut buffer = KlineBuffer::new(0);
        assert_eq!(buffer.push(kline(1000, 100.0)), Append::Accepted);
        assert_eq!(buffer.push(kline(2000, 101.0)), Append::Accepted);

        // Duplicate and stale open times are rejected.
        assert_eq!(buffer.push(kline(2000, 102.0)), Append::RejectedOutOfOrder);
        assert_eq!(buffer.push(kline(1500, 103.0)), Append::RejectedOutOfOrder);

        assert_eq!(buffer.len(), 2);
        let times: Vec<i64> = buffer.iter().map(|k| k.open_time).collect();
        assert_eq!(times, vec![1000, 2000]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = KlineBuffer::new(0);
        assert_eq!(buffer.capacity(), MIN_CAPACITY);

        for i in 0..(MIN_CAPACITY as i64 + 10) {
            buffer.push(kline(i * 1000, i as f64));
        }
        assert_eq!(buffer.len(), MIN_CAPACITY);
        assert_eq!(buffer.iter().next().unwrap().open_time, 10_000);
        assert_eq!(
            buffer.latest().unwrap().open_time,
            (MIN_CAPACITY as i64 + 9) * 1000
        );
    }

    #[test]
    fn test_lookback_hint_expands_capacity() {
        let buffer = KlineBuffer::new(2048);
        assert_eq!(buffer.capacity(), 2048);
    }

    #[test]
    fn test_columns_are_parallel() {
        let mut buffer = KlineBuffer::new(0);
        buffer.push(kline(1000, 100.0));
        buffer.push(kline(2000, 101.0));
        buffer.push(kline(3000, 99.0));

        assert_eq!(buffer.closes(), vec![100.0, 101.0, 99.0]);
        assert_eq!(buffer.volumes(), vec![1.0, 1.0, 1.0]);
    }
}
