use crate::domain::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval recognized by strategy `settings()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    pub fn as_millis(&self) -> i64 {
        match self {
            Interval::OneMinute => 60_000,
            Interval::FiveMinutes => 300_000,
            Interval::FifteenMinutes => 900_000,
            Interval::OneHour => 3_600_000,
            Interval::FourHours => 14_400_000,
            Interval::OneDay => 86_400_000,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            other => Err(ConfigError::InvalidInterval {
                interval: other.to_string(),
            }),
        }
    }
}

/// One time-bucketed OHLCV bar. Immutable once buffered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: Interval,
    /// Bucket open time, Unix milliseconds. Monotone per (symbol, interval).
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// At-a-moment snapshot of the limit order book. Either side may be empty.
/// Bids are ordered by price descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub ts: i64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Reference price for risk evaluation: mid when both sides are present,
    /// best of the populated side for a lopsided book, None when empty.
    pub fn reference_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub session_volume: f64,
    pub ts: i64,
}

/// Splits a "BASE/QUOTE" symbol. Symbols are normalized to slash form at the
/// driver boundary.
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    symbol.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, quantity: f64) -> BookLevel {
        BookLevel { price, quantity }
    }

    #[test]
    fn test_interval_round_trip() {
        for s in ["1m", "5m", "15m", "1h", "4h", "1d"] {
            assert_eq!(Interval::from_str(s).unwrap().as_str(), s);
        }
        assert!(Interval::from_str("2m").is_err());
        assert!(Interval::from_str("").is_err());
    }

    #[test]
    fn test_reference_price_balanced_book() {
        let book = OrderBookSnapshot {
            symbol: "BTC/USDT".to_string(),
            bids: vec![level(99.0, 1.0)],
            asks: vec![level(101.0, 1.0)],
            ts: 0,
        };
        assert_eq!(book.reference_price(), Some(100.0));
        assert_eq!(book.spread(), Some(2.0));
    }

    #[test]
    fn test_reference_price_lopsided_book() {
        let book = OrderBookSnapshot {
            symbol: "BTC/USDT".to_string(),
            bids: vec![level(100.0, 1.0)],
            asks: vec![],
            ts: 0,
        };
        // Bid fallback when asks are empty.
        assert_eq!(book.reference_price(), Some(100.0));
        assert_eq!(book.spread(), None);
    }

    #[test]
    fn test_reference_price_empty_book() {
        let book = OrderBookSnapshot {
            symbol: "BTC/USDT".to_string(),
            bids: vec![],
            asks: vec![],
            ts: 0,
        };
        assert_eq!(book.reference_price(), None);
    }

    #[test]
    fn test_split_symbol() {
        assert_eq!(split_symbol("BTC/USDT"), Some(("BTC", "USDT")));
        assert_eq!(split_symbol("BTCUSDT"), None);
    }
}
