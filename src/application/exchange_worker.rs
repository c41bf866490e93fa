//! Exchange-facing worker: owns the driver, fans market data out to the
//! strategy workers and funnels order traffic down.
//!
//! Fan-out policy: klines and fills are never dropped (sends apply
//! backpressure); orderbook and ticker updates are coalesced latest-wins
//! per (symbol, strategy) when a strategy mailbox is saturated.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::application::order_manager::OrderMsg;
use crate::application::portfolio_worker::PortfolioMsg;
use crate::application::strategy_worker::StrategyMsg;
use crate::domain::errors::DriverError;
use crate::domain::market::{Interval, Kline, OrderBookSnapshot, Ticker};
use crate::domain::trading::portfolio::{Balance, Position};
use crate::domain::trading::types::Order;
use crate::infrastructure::driver::{DriverEvent, ExchangeDriver};
use crate::runtime::{timer, Address, Flow, SendOutcome, Worker};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub enum ExchangeMsg {
    Driver(DriverEvent),
    Place {
        order: Order,
        reply: oneshot::Sender<Result<Order, DriverError>>,
    },
    Cancel {
        symbol: String,
        exchange_id: String,
        reply: oneshot::Sender<Result<(), DriverError>>,
    },
    OpenOrders {
        symbol: String,
        reply: oneshot::Sender<Result<Vec<Order>, DriverError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<(Vec<Balance>, Vec<Position>), DriverError>>,
    },
    Reconnect,
}

/// One strategy worker's subscription.
#[derive(Clone)]
pub struct StrategyRoute {
    pub symbol: String,
    pub interval: Interval,
    pub address: Address<StrategyMsg>,
}

pub struct ExchangeWorker {
    exchange: String,
    driver: Arc<dyn ExchangeDriver>,
    routes: Vec<StrategyRoute>,
    order_manager: Address<OrderMsg>,
    portfolio: Address<PortfolioMsg>,
    self_address: Address<ExchangeMsg>,
    /// Latest-wins stash per (route index, symbol) for droppable data.
    pending_books: HashMap<usize, OrderBookSnapshot>,
    pending_tickers: HashMap<usize, Ticker>,
    dropped_updates: u64,
}

impl ExchangeWorker {
    pub fn new(
        exchange: &str,
        driver: Arc<dyn ExchangeDriver>,
        routes: Vec<StrategyRoute>,
        order_manager: Address<OrderMsg>,
        portfolio: Address<PortfolioMsg>,
        self_address: Address<ExchangeMsg>,
    ) -> Self {
        Self {
            exchange: exchange.to_string(),
            driver,
            routes,
            order_manager,
            portfolio,
            self_address,
            pending_books: HashMap::new(),
            pending_tickers: HashMap::new(),
            dropped_updates: 0,
        }
    }

    fn symbols(&self) -> Vec<String> {
        let set: HashSet<&String> = self.routes.iter().map(|r| &r.symbol).collect();
        set.into_iter().cloned().collect()
    }

    async fn subscribe_all(&self) -> Result<(), DriverError> {
        let symbols = self.symbols();
        let (tx, rx) = mpsc::channel::<DriverEvent>(1024);
        spawn_event_pump(rx, self.self_address.clone());

        let intervals: HashSet<Interval> = self.routes.iter().map(|r| r.interval).collect();
        for interval in intervals {
            self.driver
                .subscribe_klines(&symbols, interval, tx.clone())
                .await?;
        }
        self.driver.subscribe_orderbook(&symbols, tx.clone()).await?;
        self.driver.subscribe_ticker(&symbols, tx.clone()).await?;
        self.driver.subscribe_execution(tx).await?;
        Ok(())
    }

    async fn fan_out_kline(&mut self, kline: Kline) {
        for route in &self.routes {
            if route.symbol == kline.symbol && route.interval == kline.interval {
                // Klines are critical: block on backpressure, never drop.
                let _ = route.address.send(StrategyMsg::Kline(kline.clone())).await;
            }
        }
        if let Some(price) = Decimal::from_f64(kline.close) {
            self.broadcast_price(&kline.symbol, price, kline.open_time).await;
        }
    }

    async fn broadcast_price(&self, symbol: &str, price: Decimal, ts: i64) {
        let _ = self
            .order_manager
            .send(OrderMsg::PriceUpdate {
                exchange: self.exchange.clone(),
                symbol: symbol.to_string(),
                price,
            })
            .await;
        let mut prices = HashMap::new();
        prices.insert(symbol.to_string(), price);
        let _ = self
            .portfolio
            .send(PortfolioMsg::UpdateMarketPrices {
                exchange: self.exchange.clone(),
                prices,
                ts,
            })
            .await;
    }

    fn fan_out_book(&mut self, book: OrderBookSnapshot) {
        for (idx, route) in self.routes.iter().enumerate() {
            if route.symbol != book.symbol {
                continue;
            }
            // Coalesce: a newer snapshot always replaces a stashed one, so
            // a saturated strategy sees the latest book once it drains.
            self.pending_books.remove(&idx);
            match route.address.try_send(StrategyMsg::OrderBook(book.clone())) {
                SendOutcome::Delivered => {}
                SendOutcome::Saturated(StrategyMsg::OrderBook(latest)) => {
                    self.dropped_updates += 1;
                    self.pending_books.insert(idx, latest);
                }
                SendOutcome::Saturated(_) | SendOutcome::Dead => {}
            }
        }
    }

    fn fan_out_ticker(&mut self, ticker: Ticker) {
        for (idx, route) in self.routes.iter().enumerate() {
            if route.symbol != ticker.symbol {
                continue;
            }
            match route.address.try_send(StrategyMsg::Ticker(ticker.clone())) {
                SendOutcome::Delivered => {
                    self.pending_tickers.remove(&idx);
                }
                SendOutcome::Saturated(StrategyMsg::Ticker(latest)) => {
                    self.dropped_updates += 1;
                    self.pending_tickers.insert(idx, latest);
                }
                SendOutcome::Saturated(_) | SendOutcome::Dead => {}
            }
        }
    }

    /// Retries stashed coalesced updates once their target mailbox has
    /// drained.
    fn flush_pending(&mut self) {
        let book_idxs: Vec<usize> = self.pending_books.keys().copied().collect();
        for idx in book_idxs {
            let Some(book) = self.pending_books.remove(&idx) else {
                continue;
            };
            if let Some(route) = self.routes.get(idx)
                && let SendOutcome::Saturated(StrategyMsg::OrderBook(back)) =
                    route.address.try_send(StrategyMsg::OrderBook(book))
            {
                self.pending_books.insert(idx, back);
            }
        }
        let ticker_idxs: Vec<usize> = self.pending_tickers.keys().copied().collect();
        for idx in ticker_idxs {
            let Some(ticker) = self.pending_tickers.remove(&idx) else {
                continue;
            };
            if let Some(route) = self.routes.get(idx)
                && let SendOutcome::Saturated(StrategyMsg::Ticker(back)) =
                    route.address.try_send(StrategyMsg::Ticker(ticker))
            {
                self.pending_tickers.insert(idx, back);
            }
        }
    }

    async fn handle_driver_event(&mut self, event: DriverEvent) {
        self.flush_pending();
        match event {
            DriverEvent::Kline(kline) => self.fan_out_kline(kline).await,
            DriverEvent::OrderBook(book) => self.fan_out_book(book),
            DriverEvent::Ticker(ticker) => {
                if let Some(price) = Decimal::from_f64(ticker.last_price) {
                    self.broadcast_price(&ticker.symbol, price, ticker.ts).await;
                }
                self.fan_out_ticker(ticker);
            }
            DriverEvent::OrderUpdate(update) => {
                // Fills must reach the order manager (and through it the
                // portfolio) no matter what.
                let _ = self
                    .order_manager
                    .send(OrderMsg::DriverUpdate {
                        exchange: self.exchange.clone(),
                        update,
                    })
                    .await;
            }
            DriverEvent::ConnectionLost { reason } => {
                warn!(exchange = %self.exchange, "Driver connection lost: {reason}");
                timer::once(
                    self.self_address.clone(),
                    RECONNECT_DELAY,
                    ExchangeMsg::Reconnect,
                );
            }
            DriverEvent::ConnectionRestored => {
                info!(exchange = %self.exchange, "Driver connection restored");
            }
        }
    }

    async fn reconnect(&mut self) {
        match self.driver.connect().await {
            Ok(()) => match self.subscribe_all().await {
                Ok(()) => {
                    info!(exchange = %self.exchange, "Reconnected and resubscribed");
                    let _ = self
                        .order_manager
                        .send(OrderMsg::ConnectionRestored {
                            exchange: self.exchange.clone(),
                        })
                        .await;
                    let _ = self.portfolio.send(PortfolioMsg::SyncTick).await;
                }
                Err(e) => {
                    warn!(exchange = %self.exchange, "Resubscribe failed: {e}");
                    timer::once(
                        self.self_address.clone(),
                        RECONNECT_DELAY,
                        ExchangeMsg::Reconnect,
                    );
                }
            },
            Err(DriverError::AuthFailure { reason }) => {
                // Fatal: stay down.
                warn!(exchange = %self.exchange, "Authentication failure, staying down: {reason}");
            }
            Err(e) => {
                warn!(exchange = %self.exchange, "Reconnect failed: {e}");
                timer::once(
                    self.self_address.clone(),
                    RECONNECT_DELAY,
                    ExchangeMsg::Reconnect,
                );
            }
        }
    }
}

/// Bridges the driver's event sink into the worker's mailbox.
fn spawn_event_pump(mut rx: mpsc::Receiver<DriverEvent>, address: Address<ExchangeMsg>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if address.send(ExchangeMsg::Driver(event)).await.is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl Worker for ExchangeWorker {
    type Msg = ExchangeMsg;

    fn name(&self) -> String {
        format!("exchange-{}", self.exchange)
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        self.driver.connect().await?;
        self.subscribe_all().await?;
        info!(
            exchange = %self.exchange,
            strategies = self.routes.len(),
            "Exchange worker online"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: ExchangeMsg) -> anyhow::Result<Flow> {
        match msg {
            ExchangeMsg::Driver(event) => self.handle_driver_event(event).await,
            ExchangeMsg::Place { order, reply } => {
                let result = self.driver.place_order(&order).await;
                let _ = reply.send(result);
            }
            ExchangeMsg::Cancel {
                symbol,
                exchange_id,
                reply,
            } => {
                let result = self.driver.cancel_order(&symbol, &exchange_id).await;
                let _ = reply.send(result);
            }
            ExchangeMsg::OpenOrders { symbol, reply } => {
                let result = self.driver.get_open_orders(&symbol).await;
                let _ = reply.send(result);
            }
            ExchangeMsg::Snapshot { reply } => {
                let result = match (self.driver.get_balances().await, self.driver.get_positions().await)
                {
                    (Ok(balances), Ok(positions)) => Ok((balances, positions)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                let _ = reply.send(result);
            }
            ExchangeMsg::Reconnect => self.reconnect().await,
        }
        Ok(Flow::Continue)
    }

    async fn on_stop(&mut self) {
        if self.dropped_updates > 0 {
            info!(
                exchange = %self.exchange,
                coalesced = self.dropped_updates,
                "Coalesced non-critical updates during saturation"
            );
        }
        let _ = self.driver.disconnect().await;
    }
}
