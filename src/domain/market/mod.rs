pub mod series;
pub mod types;

pub use series::KlineBuffer;
pub use types::{BookLevel, Interval, Kline, OrderBookSnapshot, Ticker, split_symbol};
