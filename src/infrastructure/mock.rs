//! Scriptable in-memory driver for tests and paper runs.
//!
//! Tests drive it directly: seed balances, publish market data, choose how
//! orders fill. Placed market orders fill immediately at the current mark
//! unless `manual_fills` is enabled, in which case tests emit fills
//! explicitly (partial fills included).

use crate::domain::errors::DriverError;
use crate::domain::market::{Interval, Kline, OrderBookSnapshot, Ticker};
use crate::domain::trading::portfolio::{Balance, Position};
use crate::domain::trading::types::{Fill, Order, OrderStatus};
use crate::infrastructure::driver::{DriverEvent, EventSink, ExchangeDriver, OrderUpdate};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    kline_sinks: Vec<EventSink>,
    book_sinks: Vec<EventSink>,
    ticker_sinks: Vec<EventSink>,
    execution_sinks: Vec<EventSink>,
    balances: Vec<Balance>,
    positions: Vec<Position>,
    open_orders: HashMap<String, Order>,
    placed: HashMap<String, Order>,
    last_prices: HashMap<String, Decimal>,
}

pub struct MockExchangeDriver {
    name: String,
    connected: AtomicBool,
    manual_fills: AtomicBool,
    fail_next_places: AtomicU64,
    fee_rate: Decimal,
    state: RwLock<MockState>,
}

impl MockExchangeDriver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connected: AtomicBool::new(false),
            manual_fills: AtomicBool::new(false),
            fail_next_places: AtomicU64::new(0),
            fee_rate: dec!(0.001),
            state: RwLock::new(MockState::default()),
        }
    }

    /// Orders stay open until the test emits fills itself.
    pub fn with_manual_fills(self) -> Self {
        self.manual_fills.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Makes the next `n` placements fail with a transient error.
    pub fn fail_next_placements(&self, n: u64) {
        self.fail_next_places.store(n, Ordering::SeqCst);
    }

    pub async fn set_balance(&self, asset: &str, available: Decimal, locked: Decimal) {
        let mut state = self.state.write().await;
        state.balances.retain(|b| b.asset != asset);
        state.balances.push(Balance {
            exchange: self.name.clone(),
            asset: asset.to_string(),
            available,
            locked,
            total: available + locked,
        });
    }

    pub async fn set_position(&self, symbol: &str, quantity: Decimal, avg_price: Decimal) {
        let mut state = self.state.write().await;
        state.positions.retain(|p| p.symbol != symbol);
        state.positions.push(Position {
            exchange: self.name.clone(),
            symbol: symbol.to_string(),
            quantity,
            avg_price,
            current_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: Utc::now().timestamp_millis(),
        });
    }

    async fn broadcast(sinks: &[EventSink], event: DriverEvent) {
        for sink in sinks {
            let _ = sink.send(event.clone()).await;
        }
    }

    pub async fn publish_kline(&self, kline: Kline) {
        let mut state = self.state.write().await;
        if let Some(price) = Decimal::from_f64_retain(kline.close) {
            state.last_prices.insert(kline.symbol.clone(), price);
        }
        let sinks = state.kline_sinks.clone();
        drop(state);
        Self::broadcast(&sinks, DriverEvent::Kline(kline)).await;
    }

    pub async fn publish_orderbook(&self, book: OrderBookSnapshot) {
        let state = self.state.read().await;
        let sinks = state.book_sinks.clone();
        drop(state);
        Self::broadcast(&sinks, DriverEvent::OrderBook(book)).await;
    }

    pub async fn publish_ticker(&self, ticker: Ticker) {
        let mut state = self.state.write().await;
        if let Some(price) = Decimal::from_f64_retain(ticker.last_price) {
            state.last_prices.insert(ticker.symbol.clone(), price);
        }
        let sinks = state.ticker_sinks.clone();
        drop(state);
        Self::broadcast(&sinks, DriverEvent::Ticker(ticker)).await;
    }

    pub async fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let state = self.state.read().await;
        let sinks = state.execution_sinks.clone();
        drop(state);
        Self::broadcast(
            &sinks,
            DriverEvent::ConnectionLost {
                reason: reason.to_string(),
            },
        )
        .await;
    }

    /// Emits a fill for a previously placed order. `quantity` may be a
    /// partial amount; the driver tracks the residual.
    pub async fn emit_fill(&self, client_id: &str, quantity: Decimal, price: Decimal) {
        let mut state = self.state.write().await;
        let Some(order) = state.open_orders.get_mut(client_id) else {
            return;
        };
        order.filled_quantity += quantity;
        let full = order.filled_quantity >= order.quantity;
        let status = if full {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.status = status;
        let update = OrderUpdate {
            client_id: client_id.to_string(),
            exchange_id: order.exchange_id.clone(),
            symbol: order.symbol.clone(),
            status,
            fill: Some(Fill {
                order_id: client_id.to_string(),
                exchange: self.name.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                quantity,
                price,
                fee: quantity * price * self.fee_rate,
                ts: Utc::now().timestamp_millis(),
            }),
        };
        if full {
            state.open_orders.remove(client_id);
        }
        let sinks = state.execution_sinks.clone();
        drop(state);
        Self::broadcast(&sinks, DriverEvent::OrderUpdate(update)).await;
    }

    pub async fn placed_count(&self) -> usize {
        self.state.read().await.placed.len()
    }

    /// True once a consumer has wired up its event sinks; tests gate on
    /// this before publishing. The ticker and execution subscriptions are
    /// the last ones an exchange worker makes, so their presence implies
    /// the kline subscription (when any strategy wants one) is in place.
    pub async fn has_subscribers(&self) -> bool {
        let state = self.state.read().await;
        !state.ticker_sinks.is_empty() && !state.execution_sinks.is_empty()
    }

    pub async fn placed_orders(&self) -> Vec<Order> {
        self.state.read().await.placed.values().cloned().collect()
    }
}

impl Default for MockExchangeDriver {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ExchangeDriver for MockExchangeDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), DriverError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe_klines(
        &self,
        _symbols: &[String],
        _interval: Interval,
        sink: EventSink,
    ) -> Result<(), DriverError> {
        self.state.write().await.kline_sinks.push(sink);
        Ok(())
    }

    async fn subscribe_orderbook(
        &self,
        _symbols: &[String],
        sink: EventSink,
    ) -> Result<(), DriverError> {
        self.state.write().await.book_sinks.push(sink);
        Ok(())
    }

    async fn subscribe_ticker(
        &self,
        _symbols: &[String],
        sink: EventSink,
    ) -> Result<(), DriverError> {
        self.state.write().await.ticker_sinks.push(sink);
        Ok(())
    }

    async fn subscribe_execution(&self, sink: EventSink) -> Result<(), DriverError> {
        self.state.write().await.execution_sinks.push(sink);
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<Order, DriverError> {
        if !self.is_connected() {
            return Err(DriverError::NotConnected);
        }
        let remaining = self.fail_next_places.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_places.store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::Transient {
                reason: "simulated placement failure".to_string(),
            });
        }

        let mut state = self.state.write().await;
        if let Some(existing) = state.placed.get(&order.client_id) {
            return Ok(existing.clone());
        }

        let mut placed = order.clone();
        placed.exchange_id = Some(Uuid::new_v4().to_string());
        placed.status = OrderStatus::Open;
        placed.touch();
        state.placed.insert(placed.client_id.clone(), placed.clone());
        state.open_orders.insert(placed.client_id.clone(), placed.clone());

        let fill_price = match placed.order_type {
            crate::domain::trading::types::OrderType::Limit => placed.price,
            _ => state.last_prices.get(&placed.symbol).copied().or(placed.price),
        };

        let immediate = !self.manual_fills.load(Ordering::SeqCst);
        if immediate && let Some(price) = fill_price {
            let quantity = placed.quantity;
            let client_id = placed.client_id.clone();
            let sinks = state.execution_sinks.clone();
            let mut filled = state.open_orders.remove(&client_id).expect("just inserted");
            filled.filled_quantity = quantity;
            filled.status = OrderStatus::Filled;
            let update = OrderUpdate {
                client_id: client_id.clone(),
                exchange_id: filled.exchange_id.clone(),
                symbol: filled.symbol.clone(),
                status: OrderStatus::Filled,
                fill: Some(Fill {
                    order_id: client_id,
                    exchange: self.name.clone(),
                    symbol: filled.symbol.clone(),
                    side: filled.side,
                    quantity,
                    price,
                    fee: quantity * price * self.fee_rate,
                    ts: Utc::now().timestamp_millis(),
                }),
            };
            drop(state);
            Self::broadcast(&sinks, DriverEvent::OrderUpdate(update)).await;
            return Ok(placed);
        }

        Ok(placed)
    }

    async fn cancel_order(&self, _symbol: &str, exchange_id: &str) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        let client_id = state
            .open_orders
            .iter()
            .find(|(_, o)| o.exchange_id.as_deref() == Some(exchange_id))
            .map(|(id, _)| id.clone());
        match client_id {
            Some(id) => {
                let mut order = state.open_orders.remove(&id).expect("found above");
                order.status = OrderStatus::Cancelled;
                let update = OrderUpdate {
                    client_id: id,
                    exchange_id: order.exchange_id.clone(),
                    symbol: order.symbol.clone(),
                    status: OrderStatus::Cancelled,
                    fill: None,
                };
                let sinks = state.execution_sinks.clone();
                drop(state);
                Self::broadcast(&sinks, DriverEvent::OrderUpdate(update)).await;
                Ok(())
            }
            None => Err(DriverError::Invariant {
                reason: format!("unknown order {exchange_id}"),
            }),
        }
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<Order>, DriverError> {
        Ok(self
            .state
            .read()
            .await
            .open_orders
            .values()
            .filter(|o| symbol.is_empty() || o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, DriverError> {
        Ok(self.state.read().await.balances.clone())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, DriverError> {
        Ok(self.state.read().await.positions.clone())
    }
}
