//! Per-(exchange, symbol, strategy) script hosting worker.
//!
//! Owns the script interpreter, the bounded kline history and the
//! capability-gated dispatch. Script failures are quarantined: the callback
//! resolves to hold, the error counter moves, and the worker stays alive.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::application::order_manager::OrderMsg;
use crate::config::ConfigValue;
use crate::domain::errors::ScriptError;
use crate::domain::market::series::Append;
use crate::domain::market::{Interval, Kline, KlineBuffer, OrderBookSnapshot, Ticker};
use crate::domain::trading::types::TradeIntent;
use crate::runtime::{Address, Flow, Worker};
use crate::scripting::{CallbackSet, ScriptHost};

pub enum StrategyMsg {
    Kline(Kline),
    OrderBook(OrderBookSnapshot),
    Ticker(Ticker),
    Status {
        reply: oneshot::Sender<StrategyStatus>,
    },
}

#[derive(Debug, Clone)]
pub struct StrategyStatus {
    pub strategy: String,
    pub exchange: String,
    pub symbol: String,
    pub interval: Interval,
    pub buffer_len: usize,
    pub error_count: u64,
    pub callbacks: CallbackSet,
}

pub struct StrategyWorker {
    exchange: String,
    symbol: String,
    strategy: String,
    source: String,
    overrides: HashMap<String, ConfigValue>,
    budget: Duration,
    order_manager: Address<OrderMsg>,
    host: Option<ScriptHost>,
    buffer: KlineBuffer,
    latest_book: Option<OrderBookSnapshot>,
    last_price: Option<f64>,
    error_count: u64,
}

impl StrategyWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: &str,
        symbol: &str,
        strategy: &str,
        source: String,
        overrides: HashMap<String, ConfigValue>,
        budget: Duration,
        order_manager: Address<OrderMsg>,
    ) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            source,
            overrides,
            budget,
            order_manager,
            host: None,
            buffer: KlineBuffer::new(0),
            latest_book: None,
            last_price: None,
            error_count: 0,
        }
    }

    /// Risk evaluates intents at this price: book mid (or best of the
    /// populated side), falling back to the last traded/closed price.
    fn reference_price(&self) -> Option<Decimal> {
        let raw = self
            .latest_book
            .as_ref()
            .and_then(|b| b.reference_price())
            .or(self.last_price)?;
        Decimal::from_f64(raw)
    }

    fn quarantine(&mut self, error: ScriptError) {
        self.error_count += 1;
        warn!(
            strategy = %self.strategy,
            symbol = %self.symbol,
            errors = self.error_count,
            "Script error quarantined: {error}"
        );
    }

    async fn dispatch(&mut self, result: Result<TradeIntent, ScriptError>) {
        let intent = match result {
            Ok(intent) => intent,
            Err(error) => {
                self.quarantine(error);
                return;
            }
        };
        if intent.is_hold() {
            return;
        }
        let Some(reference_price) = self.reference_price() else {
            warn!(
                strategy = %self.strategy,
                symbol = %self.symbol,
                "No reference price yet, dropping intent"
            );
            return;
        };
        debug!(
            strategy = %self.strategy,
            symbol = %self.symbol,
            action = ?intent.action,
            qty = %intent.quantity,
            "Intent emitted"
        );
        let _ = self
            .order_manager
            .send(OrderMsg::Intent {
                exchange: self.exchange.clone(),
                symbol: self.symbol.clone(),
                strategy: self.strategy.clone(),
                intent,
                reference_price,
            })
            .await;
    }

    async fn handle_kline(&mut self, kline: Kline) {
        let Some(host) = &self.host else {
            return;
        };
        if kline.interval != host.interval() || kline.symbol != self.symbol {
            return;
        }
        if self.buffer.push(kline.clone()) == Append::RejectedOutOfOrder {
            debug!(
                symbol = %self.symbol,
                open_time = kline.open_time,
                "Out-of-order kline rejected"
            );
            return;
        }
        self.last_price = Some(kline.close);

        if host.callbacks.on_kline {
            host.bind_market(
                &self.symbol,
                &self.exchange,
                &self.buffer,
                self.latest_book.as_ref(),
            );
            let result = host.call_on_kline(&kline);
            self.dispatch(result).await;
        }
    }

    async fn handle_orderbook(&mut self, book: OrderBookSnapshot) {
        if book.symbol != self.symbol {
            return;
        }
        self.latest_book = Some(book.clone());
        let Some(host) = &self.host else {
            return;
        };
        if host.callbacks.on_orderbook {
            host.bind_market(&self.symbol, &self.exchange, &self.buffer, Some(&book));
            let result = host.call_on_orderbook(&book);
            self.dispatch(result).await;
        }
    }

    async fn handle_ticker(&mut self, ticker: Ticker) {
        if ticker.symbol != self.symbol {
            return;
        }
        self.last_price = Some(ticker.last_price);
        let Some(host) = &self.host else {
            return;
        };
        if host.callbacks.on_ticker {
            host.bind_market(
                &self.symbol,
                &self.exchange,
                &self.buffer,
                self.latest_book.as_ref(),
            );
            let result = host.call_on_ticker(&ticker);
            self.dispatch(result).await;
        }
    }

    fn status(&self) -> StrategyStatus {
        StrategyStatus {
            strategy: self.strategy.clone(),
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            interval: self
                .host
                .as_ref()
                .map(|h| h.interval())
                .unwrap_or(Interval::OneMinute),
            buffer_len: self.buffer.len(),
            error_count: self.error_count,
            callbacks: self.host.as_ref().map(|h| h.callbacks).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Worker for StrategyWorker {
    type Msg = StrategyMsg;

    fn name(&self) -> String {
        format!("strategy-{}-{}-{}", self.exchange, self.symbol, self.strategy)
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        let host = ScriptHost::load(&self.strategy, &self.source, &self.overrides, self.budget)?;
        self.buffer = KlineBuffer::new(host.lookback_hint());
        info!(
            strategy = %self.strategy,
            exchange = %self.exchange,
            symbol = %self.symbol,
            interval = %host.interval(),
            "Strategy loaded"
        );
        if host.callbacks.on_start {
            host.bind_market(&self.symbol, &self.exchange, &self.buffer, None);
            if let Err(error) = host.call_unit("on_start") {
                self.error_count += 1;
                warn!(strategy = %self.strategy, "on_start failed: {error}");
            }
        }
        self.host = Some(host);
        Ok(())
    }

    async fn handle(&mut self, msg: StrategyMsg) -> anyhow::Result<Flow> {
        match msg {
            StrategyMsg::Kline(kline) => self.handle_kline(kline).await,
            StrategyMsg::OrderBook(book) => self.handle_orderbook(book).await,
            StrategyMsg::Ticker(ticker) => self.handle_ticker(ticker).await,
            StrategyMsg::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_stop(&mut self) {
        if let Some(host) = &self.host
            && host.callbacks.on_stop
            && let Err(error) = host.call_unit("on_stop")
        {
            warn!(strategy = %self.strategy, "on_stop failed: {error}");
        }
    }
}
