//! Order sequencing and client-side stop synthesis.
//!
//! Approved intents become concrete orders; stop-market/stop-limit,
//! trailing stops and take-profits are retained here as *armed* orders and
//! converted to live orders when a price update trips them. The worker
//! processes intents, price updates and driver events strictly in arrival
//! order, which gives the per-symbol ordering guarantee for free.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, instrument, warn};

use crate::application::events::TradingEvent;
use crate::application::exchange_worker::ExchangeMsg;
use crate::application::portfolio_worker::PortfolioMsg;
use crate::application::risk_manager::{RiskMsg, ValidateRequest};
use crate::domain::errors::DriverError;
use crate::domain::market::split_symbol;
use crate::domain::risk::RiskVerdict;
use crate::domain::trading::types::{Order, OrderSide, OrderStatus, OrderType, TradeIntent};
use crate::infrastructure::driver::OrderUpdate;
use crate::runtime::{Address, Flow, Worker, CONTROL_TIMEOUT, HOT_PATH_TIMEOUT};

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_FACTOR: u32 = 2;
const MAX_ATTEMPTS: u32 = 3;

pub enum OrderMsg {
    Intent {
        exchange: String,
        symbol: String,
        strategy: String,
        intent: TradeIntent,
        reference_price: Decimal,
    },
    PriceUpdate {
        exchange: String,
        symbol: String,
        price: Decimal,
    },
    DriverUpdate {
        exchange: String,
        update: OrderUpdate,
    },
    Cancel {
        client_id: String,
        reply: oneshot::Sender<bool>,
    },
    OpenOrders {
        reply: oneshot::Sender<Vec<Order>>,
    },
    /// A position went flat; orphaned protective arms are cancelled.
    PositionClosed {
        exchange: String,
        symbol: String,
    },
    /// Driver connectivity came back; reconcile open-order state.
    ConnectionRestored {
        exchange: String,
    },
}

/// A client-side armed order plus its trailing reference extreme.
#[derive(Debug, Clone)]
pub struct ArmedOrder {
    pub order: Order,
    pub peak: Decimal,
}

impl ArmedOrder {
    pub fn new(order: Order, current_price: Decimal) -> Self {
        Self {
            order,
            peak: current_price,
        }
    }

    fn trail_fraction(&self) -> Decimal {
        self.order
            .trail_percent
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO)
            / Decimal::ONE_HUNDRED
    }

    /// Current trigger level for this armed order.
    pub fn trigger_level(&self) -> Decimal {
        match self.order.order_type {
            OrderType::TrailingStop => match self.order.side {
                // Long protection sells below the peak.
                OrderSide::Sell => self.peak * (Decimal::ONE - self.trail_fraction()),
                // Short protection buys above the trough.
                OrderSide::Buy => self.peak * (Decimal::ONE + self.trail_fraction()),
            },
            OrderType::TakeProfit => self.order.take_profit_price.unwrap_or(Decimal::ZERO),
            _ => self.order.stop_price.unwrap_or(Decimal::ZERO),
        }
    }

    /// Feeds one price through the armed state. Trailing peaks ratchet
    /// first; returns the trigger level when the order fires.
    pub fn on_price(&mut self, price: Decimal) -> Option<Decimal> {
        if self.order.order_type == OrderType::TrailingStop {
            match self.order.side {
                OrderSide::Sell => {
                    if price > self.peak {
                        self.peak = price;
                        return None;
                    }
                }
                OrderSide::Buy => {
                    if price < self.peak {
                        self.peak = price;
                        return None;
                    }
                }
            }
        }
        let level = self.trigger_level();
        let fired = match (self.order.order_type, self.order.side) {
            (OrderType::TrailingStop, OrderSide::Sell) => price <= level,
            (OrderType::TrailingStop, OrderSide::Buy) => price >= level,
            (OrderType::TakeProfit, OrderSide::Sell) => price >= level,
            (OrderType::TakeProfit, OrderSide::Buy) => price <= level,
            (_, OrderSide::Sell) => price <= level,
            (_, OrderSide::Buy) => price >= level,
        };
        fired.then_some(level)
    }

    pub fn trigger_distance(&self, price: Decimal) -> Decimal {
        (price - self.trigger_level()).abs()
    }
}

pub struct OrderManagerWorker {
    risk: Address<RiskMsg>,
    portfolio: Address<PortfolioMsg>,
    exchanges: HashMap<String, Address<ExchangeMsg>>,
    /// Live (pending/open/partially filled) orders by client id.
    orders: HashMap<String, Order>,
    /// Armed stop/trailing/take-profit orders by client id.
    armed: HashMap<String, ArmedOrder>,
    events: broadcast::Sender<TradingEvent>,
}

impl OrderManagerWorker {
    pub fn new(
        risk: Address<RiskMsg>,
        portfolio: Address<PortfolioMsg>,
        exchanges: HashMap<String, Address<ExchangeMsg>>,
        events: broadcast::Sender<TradingEvent>,
    ) -> Self {
        Self {
            risk,
            portfolio,
            exchanges,
            orders: HashMap::new(),
            armed: HashMap::new(),
            events,
        }
    }

    fn emit(&self, event: TradingEvent) {
        let _ = self.events.send(event);
    }

    async fn record(&self, order: &Order) {
        let _ = self
            .portfolio
            .send(PortfolioMsg::RecordOrder(order.clone()))
            .await;
    }

    /// Places an order through its exchange worker with exponential backoff
    /// on transient failures.
    async fn place_with_retry(&self, order: &Order) -> Result<Order, DriverError> {
        let exchange = self.exchanges.get(&order.exchange).ok_or_else(|| {
            DriverError::Invariant {
                reason: format!("unknown exchange {}", order.exchange),
            }
        })?;

        let mut delay = RETRY_BASE;
        let mut last_error = DriverError::NotConnected;
        for attempt in 1..=MAX_ATTEMPTS {
            let submitted = order.clone();
            let result = exchange
                .request(
                    |reply| ExchangeMsg::Place {
                        order: submitted,
                        reply,
                    },
                    CONTROL_TIMEOUT,
                )
                .await;
            match result {
                Ok(Ok(placed)) => return Ok(placed),
                Ok(Err(DriverError::Transient { reason })) => {
                    warn!(
                        client_id = %order.client_id,
                        attempt,
                        "Transient placement failure: {reason}"
                    );
                    last_error = DriverError::Transient { reason };
                }
                Ok(Err(fatal)) => return Err(fatal),
                Err(request_error) => {
                    warn!(
                        client_id = %order.client_id,
                        attempt,
                        "Placement request failed: {request_error}"
                    );
                    last_error = DriverError::Transient {
                        reason: request_error.to_string(),
                    };
                }
            }
            if attempt < MAX_ATTEMPTS {
                let jitter = rand::rng().random_range(0..=delay.as_millis() as u64 / 4);
                tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                delay *= RETRY_FACTOR;
            }
        }
        Err(last_error)
    }

    async fn submit(&mut self, mut order: Order) -> bool {
        order.status = OrderStatus::Pending;
        order.touch();
        self.record(&order).await;

        // Reserve quote funds behind resting buys so the available leg
        // reflects the commitment.
        if order.order_type == OrderType::Limit
            && order.side == OrderSide::Buy
            && let (Some((_, quote)), Some(price)) = (split_symbol(&order.symbol), order.price)
        {
            let _ = self
                .portfolio
                .send(PortfolioMsg::LockFunds {
                    exchange: order.exchange.clone(),
                    asset: quote.to_string(),
                    amount: order.quantity * price,
                })
                .await;
        }

        match self.place_with_retry(&order).await {
            Ok(placed) => {
                info!(
                    client_id = %placed.client_id,
                    symbol = %placed.symbol,
                    side = %placed.side,
                    qty = %placed.quantity,
                    "Order placed"
                );
                self.orders.insert(placed.client_id.clone(), placed.clone());
                self.record(&placed).await;
                self.emit(TradingEvent::OrderPlaced { order: placed });
                true
            }
            Err(error) => {
                warn!(client_id = %order.client_id, "Placement failed for good: {error}");
                order.status = OrderStatus::Rejected;
                order.touch();
                self.record(&order).await;
                self.release_reservation(&order).await;
                let _ = self.risk.send(RiskMsg::PlacementFailed).await;
                false
            }
        }
    }

    async fn release_reservation(&self, order: &Order) {
        if order.order_type == OrderType::Limit
            && order.side == OrderSide::Buy
            && let (Some((_, quote)), Some(price)) = (split_symbol(&order.symbol), order.price)
        {
            let _ = self
                .portfolio
                .send(PortfolioMsg::UnlockFunds {
                    exchange: order.exchange.clone(),
                    asset: quote.to_string(),
                    amount: order.remaining_quantity() * price,
                })
                .await;
        }
    }

    /// Arms one protective order, enforcing at most one active trailing
    /// stop per (exchange, symbol, side).
    fn arm(&mut self, armed: ArmedOrder) {
        if armed.order.order_type == OrderType::TrailingStop {
            let duplicates: Vec<String> = self
                .armed
                .values()
                .filter(|a| {
                    a.order.order_type == OrderType::TrailingStop
                        && a.order.exchange == armed.order.exchange
                        && a.order.symbol == armed.order.symbol
                        && a.order.side == armed.order.side
                })
                .map(|a| a.order.client_id.clone())
                .collect();
            for id in duplicates {
                info!(client_id = %id, "Replacing active trailing stop");
                self.armed.remove(&id);
            }
        }
        self.armed.insert(armed.order.client_id.clone(), armed);
    }

    #[instrument(skip(self, intent), fields(symbol = %symbol, strategy = %strategy, qty = %intent.quantity))]
    async fn handle_intent(
        &mut self,
        exchange: String,
        symbol: String,
        strategy: String,
        intent: TradeIntent,
        reference_price: Decimal,
    ) {
        let Some(side) = intent.side() else {
            return;
        };
        if intent.is_hold() {
            return;
        }

        let snapshot = match self
            .portfolio
            .request(
                |reply| PortfolioMsg::Snapshot {
                    exchange: exchange.clone(),
                    reply,
                },
                HOT_PATH_TIMEOUT,
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(symbol = %symbol, "No portfolio snapshot, dropping intent: {error}");
                return;
            }
        };

        let request = ValidateRequest {
            exchange: exchange.clone(),
            symbol: symbol.clone(),
            side,
            quantity: intent.quantity,
            reference_price,
            snapshot,
        };
        let verdict = match self
            .risk
            .request(|reply| RiskMsg::Validate { request, reply }, HOT_PATH_TIMEOUT)
            .await
        {
            Ok(verdict) => verdict,
            Err(error) => {
                warn!(symbol = %symbol, "Risk validation unavailable, dropping intent: {error}");
                return;
            }
        };

        match verdict {
            RiskVerdict::Reject(violation) => {
                info!(
                    symbol = %symbol,
                    strategy = %strategy,
                    parameter = violation.parameter(),
                    "Intent rejected: {violation}"
                );
                self.emit(TradingEvent::OrderRejected {
                    exchange,
                    symbol,
                    strategy,
                    intent: format!(
                        "{:?} {} @ {:?}",
                        intent.action, intent.quantity, intent.price
                    ),
                    violation,
                });
            }
            RiskVerdict::Approve => {
                let order = Order::new(
                    &exchange,
                    &symbol,
                    side,
                    intent.order_type,
                    intent.quantity,
                    intent.price,
                    intent.reason.clone(),
                );
                let parent = order.clone();
                if self.submit(order).await {
                    self.spawn_protections(&parent, &intent, reference_price).await;
                }
            }
        }
    }

    /// Synthesizes armed stop/trailing/take-profit orders from an intent's
    /// protection fields. Protections exit the position, so they take the
    /// opposite side.
    async fn spawn_protections(
        &mut self,
        parent: &Order,
        intent: &TradeIntent,
        current_price: Decimal,
    ) {
        let exit_side = parent.side.opposite();

        if let Some(stop_price) = intent.stop_price {
            let order_type = if intent.stop_limit_price.is_some() {
                OrderType::StopLimit
            } else {
                OrderType::StopMarket
            };
            let mut stop = Order::new(
                &parent.exchange,
                &parent.symbol,
                exit_side,
                order_type,
                parent.quantity,
                intent.stop_limit_price,
                format!("stop for {}", parent.client_id),
            );
            stop.stop_price = Some(stop_price);
            self.record(&stop).await;
            self.arm(ArmedOrder::new(stop, current_price));
        }

        if let Some(trail) = intent.trail_percent {
            let mut trailing = Order::new(
                &parent.exchange,
                &parent.symbol,
                exit_side,
                OrderType::TrailingStop,
                parent.quantity,
                None,
                format!("trailing stop for {}", parent.client_id),
            );
            trailing.trail_percent = Some(trail);
            self.record(&trailing).await;
            self.arm(ArmedOrder::new(trailing, current_price));
        }

        if let Some(take_profit) = intent.take_profit {
            let mut tp = Order::new(
                &parent.exchange,
                &parent.symbol,
                exit_side,
                OrderType::TakeProfit,
                parent.quantity,
                None,
                format!("take profit for {}", parent.client_id),
            );
            tp.take_profit_price = Some(take_profit);
            self.record(&tp).await;
            self.arm(ArmedOrder::new(tp, current_price));
        }
    }

    async fn handle_price(&mut self, exchange: &str, symbol: &str, price: Decimal) {
        // Collect every armed order that fires on this update, then resolve
        // simultaneous protective-vs-take-profit triggers by the smaller
        // trigger distance.
        let mut fired: Vec<(String, Decimal)> = Vec::new();
        for (id, armed) in self.armed.iter_mut() {
            if armed.order.exchange == exchange
                && armed.order.symbol == symbol
                && let Some(level) = armed.on_price(price)
            {
                fired.push((id.clone(), level));
            }
        }
        if fired.is_empty() {
            return;
        }

        if fired.len() > 1 {
            fired.sort_by(|a, b| {
                let da = (price - a.1).abs();
                let db = (price - b.1).abs();
                da.cmp(&db).then_with(|| {
                    // Distance tie resolves to the protective stop.
                    let a_is_tp =
                        self.armed[&a.0].order.order_type == OrderType::TakeProfit;
                    let b_is_tp =
                        self.armed[&b.0].order.order_type == OrderType::TakeProfit;
                    a_is_tp.cmp(&b_is_tp)
                })
            });
            fired.truncate(1);
        }

        for (id, level) in fired {
            let Some(armed) = self.armed.remove(&id) else {
                continue;
            };
            let mut live = armed.order;
            info!(
                client_id = %live.client_id,
                symbol = %live.symbol,
                trigger = %level,
                price = %price,
                "Armed order triggered"
            );
            self.emit(TradingEvent::StopTriggered {
                client_id: live.client_id.clone(),
                symbol: live.symbol.clone(),
                trigger_price: level.to_f64().unwrap_or(f64::NAN),
            });
            // Stop-limit keeps its limit price; everything else goes out as
            // a market exit.
            if live.order_type != OrderType::StopLimit {
                live.order_type = OrderType::Market;
                live.price = None;
            } else {
                live.order_type = OrderType::Limit;
            }
            self.submit(live).await;
        }
    }

    async fn handle_driver_update(&mut self, exchange: &str, update: OrderUpdate) {
        if let Some(fill) = &update.fill {
            // Fills are never dropped: this send applies backpressure.
            let _ = self
                .portfolio
                .send(PortfolioMsg::ApplyFill(fill.clone()))
                .await;
            self.emit(TradingEvent::OrderFilled { fill: fill.clone() });
        }

        let Some(order) = self.orders.get_mut(&update.client_id) else {
            return;
        };
        if order.exchange != exchange {
            return;
        }
        order.status = update.status;
        if let Some(exchange_id) = &update.exchange_id {
            order.exchange_id = Some(exchange_id.clone());
        }
        if let Some(fill) = &update.fill {
            order.filled_quantity += fill.quantity;
        }
        order.touch();
        let snapshot = order.clone();
        self.record(&snapshot).await;
        if snapshot.status.is_terminal() {
            if snapshot.status == OrderStatus::Cancelled {
                self.release_reservation(&snapshot).await;
            }
            self.orders.remove(&update.client_id);
        }
    }

    async fn handle_cancel(&mut self, client_id: &str) -> bool {
        if let Some(armed) = self.armed.remove(client_id) {
            let mut order = armed.order;
            order.status = OrderStatus::Cancelled;
            order.touch();
            self.record(&order).await;
            return true;
        }

        let Some(order) = self.orders.get(client_id).cloned() else {
            return false;
        };
        let Some(exchange) = self.exchanges.get(&order.exchange) else {
            return false;
        };
        let Some(exchange_id) = order.exchange_id.clone() else {
            return false;
        };
        let symbol = order.symbol.clone();
        let result = exchange
            .request(
                |reply| ExchangeMsg::Cancel {
                    symbol,
                    exchange_id,
                    reply,
                },
                CONTROL_TIMEOUT,
            )
            .await;
        matches!(result, Ok(Ok(())))
    }

    /// Cancels protective arms left behind by a flattened position.
    async fn cancel_orphaned_arms(&mut self, exchange: &str, symbol: &str) {
        let orphans: Vec<String> = self
            .armed
            .values()
            .filter(|a| a.order.exchange == exchange && a.order.symbol == symbol)
            .map(|a| a.order.client_id.clone())
            .collect();
        for id in orphans {
            if let Some(armed) = self.armed.remove(&id) {
                let mut order = armed.order;
                info!(client_id = %order.client_id, "Cancelling orphaned armed order");
                order.status = OrderStatus::Cancelled;
                order.touch();
                self.record(&order).await;
            }
        }
    }

    /// After a reconnect, the driver's open-order list is ground truth for
    /// which of our live orders are still working.
    async fn reconcile(&mut self, exchange_name: &str) {
        let Some(exchange) = self.exchanges.get(exchange_name) else {
            return;
        };
        let driver_open = match exchange
            .request(
                |reply| ExchangeMsg::OpenOrders {
                    symbol: String::new(),
                    reply,
                },
                CONTROL_TIMEOUT,
            )
            .await
        {
            Ok(Ok(orders)) => orders,
            other => {
                warn!(exchange = exchange_name, "Open-order reconcile failed: {other:?}");
                return;
            }
        };

        let open_ids: std::collections::HashSet<&String> =
            driver_open.iter().map(|o| &o.client_id).collect();
        let stale: Vec<String> = self
            .orders
            .values()
            .filter(|o| {
                o.exchange == exchange_name
                    && matches!(o.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
                    && !open_ids.contains(&o.client_id)
            })
            .map(|o| o.client_id.clone())
            .collect();
        for id in stale {
            if let Some(mut order) = self.orders.remove(&id) {
                warn!(client_id = %id, "Order vanished during disconnect, marking cancelled");
                order.status = OrderStatus::Cancelled;
                order.touch();
                self.record(&order).await;
                self.release_reservation(&order).await;
            }
        }
    }

    pub fn armed_orders(&self) -> impl Iterator<Item = &ArmedOrder> {
        self.armed.values()
    }
}

#[async_trait]
impl Worker for OrderManagerWorker {
    type Msg = OrderMsg;

    fn name(&self) -> String {
        "order-manager".to_string()
    }

    async fn handle(&mut self, msg: OrderMsg) -> anyhow::Result<Flow> {
        match msg {
            OrderMsg::Intent {
                exchange,
                symbol,
                strategy,
                intent,
                reference_price,
            } => {
                self.handle_intent(exchange, symbol, strategy, intent, reference_price)
                    .await;
            }
            OrderMsg::PriceUpdate {
                exchange,
                symbol,
                price,
            } => {
                self.handle_price(&exchange, &symbol, price).await;
            }
            OrderMsg::DriverUpdate { exchange, update } => {
                self.handle_driver_update(&exchange, update).await;
            }
            OrderMsg::Cancel { client_id, reply } => {
                let cancelled = self.handle_cancel(&client_id).await;
                let _ = reply.send(cancelled);
            }
            OrderMsg::OpenOrders { reply } => {
                let mut orders: Vec<Order> = self.orders.values().cloned().collect();
                orders.extend(self.armed.values().map(|a| a.order.clone()));
                let _ = reply.send(orders);
            }
            OrderMsg::PositionClosed { exchange, symbol } => {
                self.cancel_orphaned_arms(&exchange, &symbol).await;
            }
            OrderMsg::ConnectionRestored { exchange } => {
                self.reconcile(&exchange).await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_stop(&mut self) {
        // Client-side armed orders do not survive the process; record them
        // as cancelled so nothing looks live after a restart.
        let armed: Vec<ArmedOrder> = self.armed.drain().map(|(_, a)| a).collect();
        for armed in armed {
            let mut order = armed.order;
            order.status = OrderStatus::Cancelled;
            order.touch();
            self.record(&order).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trailing_sell(trail: f64, price: Decimal) -> ArmedOrder {
        let mut order = Order::new(
            "mock",
            "BTC/USDT",
            OrderSide::Sell,
            OrderType::TrailingStop,
            dec!(0.5),
            None,
            String::new(),
        );
        order.trail_percent = Some(trail);
        ArmedOrder::new(order, price)
    }

    #[test]
    fn test_trailing_stop_scenario() {
        // Long 0.5 at avg 45000, trail 2%. Peaks at 46000, fires at 45080.
        let mut armed = trailing_sell(2.0, dec!(45000));

        assert!(armed.on_price(dec!(45100)).is_none());
        assert!(armed.on_price(dec!(45500)).is_none());
        assert!(armed.on_price(dec!(46000)).is_none());
        assert_eq!(armed.peak, dec!(46000));
        assert_eq!(armed.trigger_level(), dec!(45080));

        let level = armed.on_price(dec!(45080));
        assert_eq!(level, Some(dec!(45080)));
    }

    #[test]
    fn test_trailing_stop_short_mirrors() {
        let mut order = Order::new(
            "mock",
            "BTC/USDT",
            OrderSide::Buy,
            OrderType::TrailingStop,
            dec!(0.5),
            None,
            String::new(),
        );
        order.trail_percent = Some(10.0);
        let mut armed = ArmedOrder::new(order, dec!(100));

        assert!(armed.on_price(dec!(90)).is_none());
        assert_eq!(armed.peak, dec!(90));
        assert_eq!(armed.trigger_level(), dec!(99));
        assert_eq!(armed.on_price(dec!(99)), Some(dec!(99)));
    }

    #[test]
    fn test_stop_market_sell_triggers_below() {
        let mut order = Order::new(
            "mock",
            "BTC/USDT",
            OrderSide::Sell,
            OrderType::StopMarket,
            dec!(1),
            None,
            String::new(),
        );
        order.stop_price = Some(dec!(95));
        let mut armed = ArmedOrder::new(order, dec!(100));

        assert!(armed.on_price(dec!(96)).is_none());
        assert_eq!(armed.on_price(dec!(95)), Some(dec!(95)));
    }

    #[test]
    fn test_take_profit_sell_triggers_above() {
        let mut order = Order::new(
            "mock",
            "BTC/USDT",
            OrderSide::Sell,
            OrderType::TakeProfit,
            dec!(1),
            None,
            String::new(),
        );
        order.take_profit_price = Some(dec!(110));
        let mut armed = ArmedOrder::new(order, dec!(100));

        assert!(armed.on_price(dec!(109)).is_none());
        assert_eq!(armed.on_price(dec!(111)), Some(dec!(110)));
    }

    #[test]
    fn test_trigger_distance() {
        let mut order = Order::new(
            "mock",
            "BTC/USDT",
            OrderSide::Sell,
            OrderType::StopMarket,
            dec!(1),
            None,
            String::new(),
        );
        order.stop_price = Some(dec!(95));
        let armed = ArmedOrder::new(order, dec!(100));
        assert_eq!(armed.trigger_distance(dec!(94)), dec!(1));
        assert_eq!(armed.trigger_distance(dec!(96)), dec!(1));
    }
}
