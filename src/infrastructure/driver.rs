//! Abstract exchange capability.
//!
//! Concrete wire adapters live outside this crate; the exchange worker owns
//! exactly one driver and nothing else may touch it. Drivers push market
//! data and execution events into mpsc sinks and report connectivity loss
//! asynchronously through the same channel.

use crate::domain::errors::DriverError;
use crate::domain::market::{Interval, Kline, OrderBookSnapshot, Ticker};
use crate::domain::trading::portfolio::{Balance, Position};
use crate::domain::trading::types::{Fill, Order, OrderStatus};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Everything a driver can push upstream.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Kline(Kline),
    OrderBook(OrderBookSnapshot),
    Ticker(Ticker),
    OrderUpdate(OrderUpdate),
    ConnectionLost { reason: String },
    ConnectionRestored,
}

/// Async order lifecycle notification (ack, fill, cancel, reject).
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub client_id: String,
    pub exchange_id: Option<String>,
    pub symbol: String,
    pub status: OrderStatus,
    pub fill: Option<Fill>,
}

pub type EventSink = mpsc::Sender<DriverEvent>;

#[async_trait]
pub trait ExchangeDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), DriverError>;
    async fn disconnect(&self) -> Result<(), DriverError>;
    fn is_connected(&self) -> bool;

    async fn subscribe_klines(
        &self,
        symbols: &[String],
        interval: Interval,
        sink: EventSink,
    ) -> Result<(), DriverError>;

    async fn subscribe_orderbook(&self, symbols: &[String], sink: EventSink)
    -> Result<(), DriverError>;

    async fn subscribe_ticker(&self, symbols: &[String], sink: EventSink)
    -> Result<(), DriverError>;

    /// Order ack/fill/cancel notifications.
    async fn subscribe_execution(&self, sink: EventSink) -> Result<(), DriverError>;

    /// Idempotent on `client_id`: re-submitting a known order returns the
    /// previously placed order unchanged.
    async fn place_order(&self, order: &Order) -> Result<Order, DriverError>;

    async fn cancel_order(&self, symbol: &str, exchange_id: &str) -> Result<(), DriverError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<Order>, DriverError>;

    async fn get_balances(&self) -> Result<Vec<Balance>, DriverError>;

    async fn get_positions(&self) -> Result<Vec<Position>, DriverError>;
}
