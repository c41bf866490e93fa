//! Periodic allocation host: a thinner sibling of the strategy worker
//! running the same sandbox with `settings()` plus a single
//! `on_rebalance()` callback. Emitted orders funnel through the ordinary
//! risk-validated order path, capped per invocation.

use async_trait::async_trait;
use rhai::{Dynamic, Map};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use crate::application::events::TradingEvent;
use crate::application::order_manager::OrderMsg;
use crate::application::portfolio_worker::{PortfolioMsg, PortfolioOverview};
use crate::application::risk_manager::RiskMsg;
use crate::config::ConfigValue;
use crate::domain::indicators::correlation;
use crate::domain::market::split_symbol;
use crate::domain::trading::types::{IntentAction, OrderSide, TradeIntent};
use crate::runtime::{timer, Address, Flow, Worker, HOT_PATH_TIMEOUT};
use crate::scripting::{parse_rebalance_order, RebalanceOrder, ScriptHost};

const DEFAULT_REBALANCE_INTERVAL_SECS: i64 = 3600;
const DEFAULT_MAX_TRADES: i64 = 10;
/// Below this much shared return history the advisory correlation check
/// has nothing trustworthy to say and stays silent.
const MIN_CORRELATION_SAMPLES: usize = 20;

pub enum RebalanceMsg {
    Tick,
    Status {
        reply: oneshot::Sender<RebalanceStatus>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RebalanceStatus {
    pub runs: u64,
    pub last_planned: usize,
    pub last_executed: usize,
    pub error_count: u64,
}

/// Read-side context the helper functions serve from; refreshed before each
/// invocation.
#[derive(Default)]
struct HelperContext {
    balances: Map,
    prices: Map,
    portfolio_value: f64,
}

pub struct RebalanceWorker {
    exchange: String,
    source: String,
    overrides: HashMap<String, ConfigValue>,
    budget: Duration,
    portfolio: Address<PortfolioMsg>,
    order_manager: Address<OrderMsg>,
    risk: Address<RiskMsg>,
    self_address: Address<RebalanceMsg>,
    events: broadcast::Sender<TradingEvent>,
    host: Option<ScriptHost>,
    context: Arc<RwLock<HelperContext>>,
    sink: Arc<Mutex<Vec<RebalanceOrder>>>,
    status: RebalanceStatus,
}

impl RebalanceWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: &str,
        source: String,
        overrides: HashMap<String, ConfigValue>,
        budget: Duration,
        portfolio: Address<PortfolioMsg>,
        order_manager: Address<OrderMsg>,
        risk: Address<RiskMsg>,
        self_address: Address<RebalanceMsg>,
        events: broadcast::Sender<TradingEvent>,
    ) -> Self {
        Self {
            exchange: exchange.to_string(),
            source,
            overrides,
            budget,
            portfolio,
            order_manager,
            risk,
            self_address,
            events,
            host: None,
            context: Arc::new(RwLock::new(HelperContext::default())),
            sink: Arc::new(Mutex::new(Vec::new())),
            status: RebalanceStatus::default(),
        }
    }

    fn refresh_context(&self, overview: &PortfolioOverview) {
        let mut context = self.context.write().expect("rebalance context poisoned");
        context.balances = overview
            .balances
            .iter()
            .map(|(asset, amount)| {
                (
                    asset.as_str().into(),
                    Dynamic::from_float(amount.to_f64().unwrap_or(0.0)),
                )
            })
            .collect();
        context.prices = overview
            .prices
            .iter()
            .map(|(symbol, price)| {
                (
                    symbol.as_str().into(),
                    Dynamic::from_float(price.to_f64().unwrap_or(0.0)),
                )
            })
            .collect();
        context.portfolio_value = overview.portfolio_value.to_f64().unwrap_or(0.0);
    }

    async fn run_rebalance(&mut self) {
        let Some(host) = &self.host else {
            return;
        };
        if !host.callbacks.on_rebalance {
            return;
        }

        let overview = match self
            .portfolio
            .request(
                |reply| PortfolioMsg::Overview {
                    exchange: self.exchange.clone(),
                    reply,
                },
                HOT_PATH_TIMEOUT,
            )
            .await
        {
            Ok(overview) => overview,
            Err(error) => {
                warn!(exchange = %self.exchange, "No portfolio overview: {error}");
                return;
            }
        };
        self.refresh_context(&overview);
        self.sink.lock().expect("rebalance sink poisoned").clear();

        if let Err(error) = host.call_unit("on_rebalance") {
            self.status.error_count += 1;
            warn!(exchange = %self.exchange, "on_rebalance failed: {error}");
            return;
        }

        let planned: Vec<RebalanceOrder> = {
            let mut sink = self.sink.lock().expect("rebalance sink poisoned");
            sink.drain(..).collect()
        };
        let cap = host.config_i64("max_trades_per_rebalance", DEFAULT_MAX_TRADES).max(0) as usize;
        let total_planned = planned.len();

        // Advisory correlation threshold comes from the risk worker; if it
        // cannot answer, the advisory check stays out of the way.
        let max_correlation = match self
            .risk
            .request(|reply| RiskMsg::Parameters { reply }, HOT_PATH_TIMEOUT)
            .await
        {
            Ok(params) => Some(params.max_correlation),
            Err(error) => {
                warn!(exchange = %self.exchange, "Risk parameters unavailable: {error}");
                None
            }
        };
        let held = held_symbols(&overview);

        let mut executed = 0;
        for order in planned.into_iter().take(cap) {
            let Some(reference_price) = overview
                .prices
                .get(&order.symbol)
                .copied()
                .filter(|p| *p > Decimal::ZERO)
            else {
                warn!(symbol = %order.symbol, "No price for rebalance order, skipping");
                continue;
            };
            // Buys that would stack exposure onto an already-held, highly
            // correlated symbol are skipped; sells reduce exposure and
            // always pass the advisory check.
            if order.side == OrderSide::Buy
                && let Some(limit) = max_correlation
                && let Some((peer, coefficient)) =
                    correlation_conflict(&order.symbol, &overview.returns, &held, limit)
            {
                warn!(
                    symbol = %order.symbol,
                    peer = %peer,
                    correlation = coefficient,
                    limit,
                    "Rebalance buy skipped: too correlated with held position"
                );
                continue;
            }
            let intent = TradeIntent {
                action: match order.side {
                    OrderSide::Buy => IntentAction::Buy,
                    OrderSide::Sell => IntentAction::Sell,
                },
                quantity: order.quantity,
                price: None,
                order_type: order.order_type,
                reason: order.reason.clone(),
                stop_price: None,
                stop_limit_price: None,
                trail_percent: None,
                take_profit: None,
            };
            let _ = self
                .order_manager
                .send(OrderMsg::Intent {
                    exchange: self.exchange.clone(),
                    symbol: order.symbol.clone(),
                    strategy: "rebalance".to_string(),
                    intent,
                    reference_price,
                })
                .await;
            executed += 1;
        }

        self.status.runs += 1;
        self.status.last_planned = total_planned;
        self.status.last_executed = executed;
        info!(
            exchange = %self.exchange,
            trades_executed = executed,
            total_trades_planned = total_planned,
            "Rebalance pass complete"
        );
        let _ = self.events.send(TradingEvent::RebalanceCompleted {
            trades_executed: executed,
            total_trades_planned: total_planned,
        });
    }
}

/// Symbols the portfolio actually holds (priced, with a nonzero base
/// balance).
fn held_symbols(overview: &PortfolioOverview) -> Vec<String> {
    overview
        .prices
        .keys()
        .filter(|symbol| {
            split_symbol(symbol)
                .and_then(|(base, _)| overview.balances.get(base))
                .map(|amount| *amount > Decimal::ZERO)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Pearson correlation of the candidate's return history against each held
/// symbol's, over their shared window. Returns the first held symbol whose
/// coefficient exceeds `limit`.
fn correlation_conflict(
    candidate: &str,
    returns: &HashMap<String, Vec<f64>>,
    held: &[String],
    limit: f64,
) -> Option<(String, f64)> {
    let xs = returns.get(candidate)?;
    for symbol in held {
        if symbol == candidate {
            continue;
        }
        let Some(ys) = returns.get(symbol) else {
            continue;
        };
        let n = xs.len().min(ys.len());
        if n < MIN_CORRELATION_SAMPLES {
            continue;
        }
        let series = correlation(&xs[xs.len() - n..], &ys[ys.len() - n..], n);
        if let Some(coefficient) = series.last().copied()
            && !coefficient.is_nan()
            && coefficient > limit
        {
            return Some((symbol.clone(), coefficient));
        }
    }
    None
}

#[async_trait]
impl Worker for RebalanceWorker {
    type Msg = RebalanceMsg;

    fn name(&self) -> String {
        format!("rebalance-{}", self.exchange)
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        let context = self.context.clone();
        let balances_context = context.clone();
        let prices_context = context.clone();
        let value_context = context.clone();
        let sink = self.sink.clone();

        let host = ScriptHost::load_with(
            "rebalance",
            &self.source,
            &self.overrides,
            self.budget,
            move |engine| {
                engine.register_fn("get_balances", move || -> Map {
                    balances_context
                        .read()
                        .expect("rebalance context poisoned")
                        .balances
                        .clone()
                });
                engine.register_fn("get_current_prices", move || -> Map {
                    prices_context
                        .read()
                        .expect("rebalance context poisoned")
                        .prices
                        .clone()
                });
                engine.register_fn("get_portfolio_value", move || -> f64 {
                    value_context
                        .read()
                        .expect("rebalance context poisoned")
                        .portfolio_value
                });
                engine.register_fn(
                    "place_order",
                    move |symbol: &str, side: &str, qty: f64, order_type: &str, reason: &str| -> bool {
                        let mut map = Map::new();
                        map.insert("symbol".into(), Dynamic::from(symbol.to_string()));
                        map.insert("side".into(), Dynamic::from(side.to_string()));
                        map.insert("qty".into(), Dynamic::from_float(qty));
                        map.insert("type".into(), Dynamic::from(order_type.to_string()));
                        map.insert("reason".into(), Dynamic::from(reason.to_string()));
                        match parse_rebalance_order(&map) {
                            Some(order) => {
                                sink.lock().expect("rebalance sink poisoned").push(order);
                                true
                            }
                            None => false,
                        }
                    },
                );
            },
        )?;

        let interval_secs = host
            .config_i64("rebalance_interval", DEFAULT_REBALANCE_INTERVAL_SECS)
            .max(1) as u64;
        timer::every(
            self.self_address.clone(),
            Duration::from_secs(interval_secs),
            || RebalanceMsg::Tick,
        );
        info!(
            exchange = %self.exchange,
            interval_secs,
            "Rebalance host online"
        );
        self.host = Some(host);
        Ok(())
    }

    async fn handle(&mut self, msg: RebalanceMsg) -> anyhow::Result<Flow> {
        match msg {
            RebalanceMsg::Tick => self.run_rebalance().await,
            RebalanceMsg::Status { reply } => {
                let _ = reply.send(self.status.clone());
            }
        }
        Ok(Flow::Continue)
    }
}
