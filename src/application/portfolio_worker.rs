//! Authoritative ledger worker: one `Ledger` per exchange, fill
//! application, market marks, the daily P&L roll and the periodic driver
//! reconciliation. All persistence writes flow through here.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

use crate::application::exchange_worker::ExchangeMsg;
use crate::application::order_manager::OrderMsg;
use crate::domain::repositories::{OrderRepository, PnlRepository, PositionRepository, TradeRepository};
use crate::domain::trading::portfolio::{Ledger, PortfolioSnapshot};
use crate::domain::trading::types::{Fill, Order};
use crate::runtime::{Address, Flow, Worker, CONTROL_TIMEOUT};

/// Price marks kept per symbol for the volatility estimate feeding VaR.
const RETURN_WINDOW: usize = 120;

/// Balances, marks and total value handed to the rebalance host.
#[derive(Debug, Clone)]
pub struct PortfolioOverview {
    pub balances: HashMap<String, Decimal>,
    pub prices: HashMap<String, Decimal>,
    pub portfolio_value: Decimal,
    /// Recent marked returns per symbol, oldest first; feeds the advisory
    /// correlation check on the rebalance path.
    pub returns: HashMap<String, Vec<f64>>,
}

pub enum PortfolioMsg {
    ApplyFill(Fill),
    RecordOrder(Order),
    Deposit {
        exchange: String,
        asset: String,
        amount: Decimal,
    },
    LockFunds {
        exchange: String,
        asset: String,
        amount: Decimal,
    },
    UnlockFunds {
        exchange: String,
        asset: String,
        amount: Decimal,
    },
    UpdateMarketPrices {
        exchange: String,
        prices: HashMap<String, Decimal>,
        ts: i64,
    },
    Snapshot {
        exchange: String,
        reply: oneshot::Sender<PortfolioSnapshot>,
    },
    Overview {
        exchange: String,
        reply: oneshot::Sender<PortfolioOverview>,
    },
    /// 5-minute reconciliation tick.
    SyncTick,
    /// Local-date rollover tick.
    RollDay,
}

#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub positions: Arc<dyn PositionRepository>,
    pub pnl: Arc<dyn PnlRepository>,
}

pub struct PortfolioWorker {
    ledgers: HashMap<String, Ledger>,
    exchanges: HashMap<String, Address<ExchangeMsg>>,
    order_manager: Address<OrderMsg>,
    repos: Option<Repositories>,
    returns: HashMap<(String, String), VecDeque<f64>>,
    last_prices: HashMap<(String, String), Decimal>,
    current_date: NaiveDate,
}

impl PortfolioWorker {
    pub fn new(
        exchange_names: &[String],
        exchanges: HashMap<String, Address<ExchangeMsg>>,
        order_manager: Address<OrderMsg>,
        repos: Option<Repositories>,
    ) -> Self {
        let ledgers = exchange_names
            .iter()
            .map(|name| (name.clone(), Ledger::new(name)))
            .collect();
        Self {
            ledgers,
            exchanges,
            order_manager,
            repos,
            returns: HashMap::new(),
            last_prices: HashMap::new(),
            current_date: Utc::now().date_naive(),
        }
    }

    fn ledger_mut(&mut self, exchange: &str) -> &mut Ledger {
        self.ledgers
            .entry(exchange.to_string())
            .or_insert_with(|| Ledger::new(exchange))
    }

    fn volatility_for(&self, exchange: &str) -> HashMap<String, f64> {
        self.returns
            .iter()
            .filter(|((e, _), window)| e == exchange && window.len() >= 2)
            .map(|((_, symbol), window)| {
                let xs: Vec<f64> = window.iter().copied().collect();
                (symbol.clone(), sample_stdev(&xs))
            })
            .collect()
    }

    #[instrument(skip(self, fill), fields(symbol = %fill.symbol, side = %fill.side, qty = %fill.quantity))]
    async fn apply_fill(&mut self, fill: Fill) -> anyhow::Result<()> {
        let exchange = fill.exchange.clone();
        let effect = match self.ledger_mut(&exchange).apply_fill(&fill) {
            Ok(effect) => effect,
            Err(e) => {
                // An approved fill that still breaks the ledger is a logic
                // bug; fail the worker so the supervisor restarts it and
                // quarantines this message.
                error!(
                    order_id = %fill.order_id,
                    symbol = %fill.symbol,
                    "Ledger invariant violation on fill: {e}"
                );
                return Err(e.into());
            }
        };

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            qty = %fill.quantity,
            price = %fill.price,
            realized = %effect.realized_delta,
            "Fill applied"
        );

        if let Some(repos) = &self.repos {
            if let Err(e) = repos.trades.record(&fill).await {
                warn!("Trade persistence failed: {e}");
            }
            if let Some(position) = self.ledgers[&exchange].position(&fill.symbol)
                && let Err(e) = repos.positions.upsert(position).await
            {
                warn!("Position persistence failed: {e}");
            }
        }

        if effect.flattened {
            let _ = self
                .order_manager
                .send(OrderMsg::PositionClosed {
                    exchange,
                    symbol: fill.symbol.clone(),
                })
                .await;
        }
        Ok(())
    }

    fn track_returns(&mut self, exchange: &str, prices: &HashMap<String, Decimal>) {
        for (symbol, price) in prices {
            let key = (exchange.to_string(), symbol.clone());
            if let Some(prev) = self.last_prices.get(&key)
                && *prev > Decimal::ZERO
            {
                let ret = ((price - prev) / prev).to_f64().unwrap_or(0.0);
                let window = self.returns.entry(key.clone()).or_default();
                if window.len() == RETURN_WINDOW {
                    window.pop_front();
                }
                window.push_back(ret);
            }
            self.last_prices.insert(key, *price);
        }
    }

    async fn sync(&mut self) {
        let names: Vec<String> = self.exchanges.keys().cloned().collect();
        for name in names {
            let Some(address) = self.exchanges.get(&name) else {
                continue;
            };
            match address
                .request(|reply| ExchangeMsg::Snapshot { reply }, CONTROL_TIMEOUT)
                .await
            {
                Ok(Ok((balances, positions))) => {
                    self.ledger_mut(&name).reconcile(balances, positions);
                    info!(exchange = %name, "Ledger reconciled against driver snapshot");
                }
                Ok(Err(e)) => warn!(exchange = %name, "Driver snapshot failed: {e}"),
                Err(e) => warn!(exchange = %name, "Driver snapshot unavailable: {e}"),
            }
        }
    }

    async fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today == self.current_date {
            return;
        }
        let closed_date = self.current_date;
        self.current_date = today;
        let names: Vec<String> = self.ledgers.keys().cloned().collect();
        for name in names {
            let record = self.ledger_mut(&name).roll_day(closed_date);
            info!(
                exchange = %name,
                date = %record.date,
                realized = %record.realized,
                "Daily P&L rolled"
            );
            if let Some(repos) = &self.repos
                && let Err(e) = repos.pnl.record(&name, &record).await
            {
                warn!("P&L persistence failed: {e}");
            }
        }
    }

    fn overview(&self, exchange: &str) -> PortfolioOverview {
        let Some(ledger) = self.ledgers.get(exchange) else {
            return PortfolioOverview {
                balances: HashMap::new(),
                prices: HashMap::new(),
                portfolio_value: Decimal::ZERO,
                returns: HashMap::new(),
            };
        };
        let balances = ledger
            .balances()
            .iter()
            .map(|(asset, b)| (asset.clone(), b.total))
            .collect();
        let prices = self
            .last_prices
            .iter()
            .filter(|((e, _), _)| e == exchange)
            .map(|((_, symbol), price)| (symbol.clone(), *price))
            .collect();
        let returns = self
            .returns
            .iter()
            .filter(|((e, _), _)| e == exchange)
            .map(|((_, symbol), window)| (symbol.clone(), window.iter().copied().collect()))
            .collect();
        PortfolioOverview {
            balances,
            prices,
            portfolio_value: ledger.equity(),
            returns,
        }
    }
}

/// Sample standard deviation of a return series.
fn sample_stdev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

#[async_trait]
impl Worker for PortfolioWorker {
    type Msg = PortfolioMsg;

    fn name(&self) -> String {
        "portfolio".to_string()
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        // Rehydrate positions from storage, then let the driver snapshot
        // correct anything stale.
        if let Some(repos) = self.repos.clone() {
            let names: Vec<String> = self.ledgers.keys().cloned().collect();
            for name in &names {
                match repos.positions.load_all(name).await {
                    Ok(positions) if !positions.is_empty() => {
                        info!(exchange = %name, count = positions.len(), "Positions rehydrated");
                        self.ledger_mut(name).reconcile(Vec::new(), positions);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(exchange = %name, "Position rehydration failed: {e}"),
                }
            }
        }
        self.sync().await;
        Ok(())
    }

    async fn handle(&mut self, msg: PortfolioMsg) -> anyhow::Result<Flow> {
        match msg {
            PortfolioMsg::ApplyFill(fill) => self.apply_fill(fill).await?,
            PortfolioMsg::RecordOrder(order) => {
                if let Some(repos) = &self.repos
                    && let Err(e) = repos.orders.save(&order).await
                {
                    warn!("Order persistence failed: {e}");
                }
            }
            PortfolioMsg::Deposit {
                exchange,
                asset,
                amount,
            } => {
                self.ledger_mut(&exchange).deposit(&asset, amount);
            }
            PortfolioMsg::LockFunds {
                exchange,
                asset,
                amount,
            } => {
                if let Err(e) = self.ledger_mut(&exchange).lock(&asset, amount) {
                    warn!(asset = %asset, "Fund lock failed: {e}");
                }
            }
            PortfolioMsg::UnlockFunds {
                exchange,
                asset,
                amount,
            } => {
                self.ledger_mut(&exchange).unlock(&asset, amount);
            }
            PortfolioMsg::UpdateMarketPrices {
                exchange,
                prices,
                ts,
            } => {
                self.track_returns(&exchange, &prices);
                self.ledger_mut(&exchange).mark_prices(&prices, ts);
            }
            PortfolioMsg::Snapshot { exchange, reply } => {
                let volatility = self.volatility_for(&exchange);
                let snapshot = self.ledger_mut(&exchange).snapshot(volatility);
                let _ = reply.send(snapshot);
            }
            PortfolioMsg::Overview { exchange, reply } => {
                let _ = reply.send(self.overview(&exchange));
            }
            PortfolioMsg::SyncTick => self.sync().await,
            PortfolioMsg::RollDay => self.roll_day().await,
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stdev() {
        assert_eq!(sample_stdev(&[]), 0.0);
        assert_eq!(sample_stdev(&[1.0]), 0.0);
        let sd = sample_stdev(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((sd - 1.5811388).abs() < 1e-6);
    }
}
