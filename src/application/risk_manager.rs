//! Pre-trade validation against the mutable risk-parameter set.
//!
//! The worker owns the parameters and the rolling trade counters. Each
//! validation runs over a *copied* portfolio snapshot and a hypothetical
//! post-fill state at the caller-supplied reference price; parameters are
//! evaluated in a fixed order and the first failure rejects. Counters move
//! only on approval and are reverted when the order manager reports a
//! placement failure.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::domain::errors::RiskViolation;
use crate::domain::market::split_symbol;
use crate::domain::repositories::SettingsRepository;
use crate::domain::risk::{RiskParameterName, RiskParameters, RiskVerdict};
use crate::domain::trading::portfolio::PortfolioSnapshot;
use crate::domain::trading::types::OrderSide;
use crate::runtime::{Flow, Worker};
use std::sync::Arc;

const HOUR_MS: i64 = 3_600_000;

#[derive(Debug)]
pub struct ValidateRequest {
    pub exchange: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub reference_price: Decimal,
    pub snapshot: PortfolioSnapshot,
}

pub enum RiskMsg {
    Validate {
        request: ValidateRequest,
        reply: oneshot::Sender<RiskVerdict>,
    },
    SetParameter {
        name: RiskParameterName,
        value: f64,
    },
    Parameters {
        reply: oneshot::Sender<RiskParameters>,
    },
    /// The order manager failed to place an approved order; the counters
    /// that moved on approval are rolled back.
    PlacementFailed,
    /// Local-date rollover tick.
    RollDay,
}

pub struct RiskManagerWorker {
    params: RiskParameters,
    trades_today: u32,
    hourly: VecDeque<i64>,
    current_date: NaiveDate,
    z95: f64,
    settings: Option<Arc<dyn SettingsRepository>>,
}

impl RiskManagerWorker {
    pub fn new(params: RiskParameters) -> Self {
        let normal = Normal::new(0.0, 1.0).expect("standard normal");
        Self {
            params,
            trades_today: 0,
            hourly: VecDeque::new(),
            current_date: Utc::now().date_naive(),
            z95: normal.inverse_cdf(0.95),
            settings: None,
        }
    }

    /// Parameter updates are written through so they survive restarts.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsRepository>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    fn prune_hourly(&mut self, now_ms: i64) {
        while let Some(front) = self.hourly.front()
            && now_ms - front >= HOUR_MS
        {
            self.hourly.pop_front();
        }
    }

    /// Runs the fixed check sequence. On approval the rolling counters are
    /// bumped; on rejection nothing moves.
    pub fn validate(&mut self, request: &ValidateRequest) -> RiskVerdict {
        let now_ms = Utc::now().timestamp_millis();
        self.prune_hourly(now_ms);

        if let Some(violation) = self.check(request) {
            debug!(
                symbol = %request.symbol,
                parameter = violation.parameter(),
                "Intent rejected: {violation}"
            );
            return RiskVerdict::Reject(violation);
        }

        self.trades_today += 1;
        self.hourly.push_back(now_ms);
        RiskVerdict::Approve
    }

    fn check(&self, request: &ValidateRequest) -> Option<RiskViolation> {
        let snapshot = &request.snapshot;
        let qty = request.quantity;
        let price = request.reference_price;
        let notional = qty * price;
        let position_qty = snapshot.position_qty(&request.symbol);
        let equity = snapshot.equity.to_f64().unwrap_or(0.0);

        // Balance feasibility precedes the named parameters: an approved
        // fill must never drive an available leg negative.
        if let Some((base, quote)) = split_symbol(&request.symbol) {
            match request.side {
                OrderSide::Buy => {
                    let available = snapshot
                        .balances
                        .get(quote)
                        .map(|b| b.available)
                        .unwrap_or(Decimal::ZERO);
                    if notional > available {
                        return Some(RiskViolation::InsufficientBalance {
                            asset: quote.to_string(),
                            need: notional,
                            available,
                        });
                    }
                }
                OrderSide::Sell => {
                    let held = snapshot
                        .balances
                        .get(base)
                        .map(|b| b.available + b.locked)
                        .unwrap_or(position_qty);
                    if qty > held {
                        return Some(RiskViolation::InsufficientBalance {
                            asset: base.to_string(),
                            need: qty,
                            available: held,
                        });
                    }
                }
            }
        }

        // 1. max_position_size
        let would_be = match request.side {
            OrderSide::Buy => position_qty + qty,
            OrderSide::Sell => (position_qty - qty).max(Decimal::ZERO),
        };
        if would_be > self.params.max_position_size {
            return Some(RiskViolation::MaxPositionSize {
                symbol: request.symbol.clone(),
                would_be,
                limit: self.params.max_position_size,
            });
        }

        // 2. max_daily_loss over the hypothetical post-fill day P&L.
        let hypothetical_realized = match request.side {
            OrderSide::Sell => {
                let closing = qty.min(position_qty);
                let avg = snapshot
                    .positions
                    .get(&request.symbol)
                    .map(|p| p.avg_price)
                    .unwrap_or(Decimal::ZERO);
                (price - avg) * closing
            }
            OrderSide::Buy => Decimal::ZERO,
        };
        let projected = snapshot.daily_pnl + hypothetical_realized;
        if projected < Decimal::ZERO && -projected > self.params.max_daily_loss {
            return Some(RiskViolation::MaxDailyLoss {
                projected: -projected,
                limit: self.params.max_daily_loss,
            });
        }

        // Post-fill gross exposure.
        let delta = match request.side {
            OrderSide::Buy => notional,
            OrderSide::Sell => -(qty.min(position_qty) * price),
        };
        let gross = (snapshot.gross_exposure() + delta).max(Decimal::ZERO);
        let exposure_ratio = if equity > 0.0 {
            gross.to_f64().unwrap_or(f64::INFINITY) / equity
        } else if gross > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        // 3. max_portfolio_risk
        if exposure_ratio > self.params.max_portfolio_risk {
            return Some(RiskViolation::MaxPortfolioRisk {
                ratio: exposure_ratio,
                limit: self.params.max_portfolio_risk,
            });
        }

        // 4. max_correlation is advisory (rebalance-path only).

        // 5. max_leverage
        if exposure_ratio > self.params.max_leverage {
            return Some(RiskViolation::MaxLeverage {
                leverage: exposure_ratio,
                limit: self.params.max_leverage,
            });
        }

        // 6. max_daily_trades
        if self.trades_today >= self.params.max_daily_trades {
            return Some(RiskViolation::MaxDailyTrades {
                count: self.trades_today,
                limit: self.params.max_daily_trades,
            });
        }

        // 7. max_hourly_trades
        if self.hourly.len() as u32 >= self.params.max_hourly_trades {
            return Some(RiskViolation::MaxHourlyTrades {
                count: self.hourly.len() as u32,
                limit: self.params.max_hourly_trades,
            });
        }

        // 8. var_limit: conservative sum of per-position notional VaR with
        // no cross-correlation netting.
        if self.params.var_limit.is_finite() {
            let mut var = 0.0;
            for (symbol, position) in &snapshot.positions {
                let mut pos_notional = position.notional().to_f64().unwrap_or(0.0);
                if *symbol == request.symbol {
                    pos_notional += delta.to_f64().unwrap_or(0.0);
                }
                let sigma = snapshot.volatility.get(symbol).copied().unwrap_or(0.0);
                var += pos_notional.max(0.0) * sigma * self.z95;
            }
            if !snapshot.positions.contains_key(&request.symbol)
                && request.side == OrderSide::Buy
            {
                let sigma = snapshot
                    .volatility
                    .get(&request.symbol)
                    .copied()
                    .unwrap_or(0.0);
                var += notional.to_f64().unwrap_or(0.0) * sigma * self.z95;
            }
            if var > self.params.var_limit {
                return Some(RiskViolation::VarLimit {
                    var,
                    limit: self.params.var_limit,
                });
            }
        }

        // 9. max_drawdown_limit: flat-only mode once breached.
        let drawdown = snapshot.drawdown();
        if drawdown > self.params.max_drawdown_limit && request.side == OrderSide::Buy {
            return Some(RiskViolation::MaxDrawdown {
                drawdown,
                limit: self.params.max_drawdown_limit,
            });
        }

        // 10. concentration_limit on the intent's symbol post-fill.
        let symbol_notional = snapshot
            .positions
            .get(&request.symbol)
            .map(|p| p.notional())
            .unwrap_or(Decimal::ZERO)
            + delta;
        let concentration = if equity > 0.0 {
            symbol_notional.max(Decimal::ZERO).to_f64().unwrap_or(0.0) / equity
        } else if symbol_notional > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };
        if concentration > self.params.concentration_limit {
            return Some(RiskViolation::Concentration {
                symbol: request.symbol.clone(),
                ratio: concentration,
                limit: self.params.concentration_limit,
            });
        }

        None
    }

    fn revert_approval(&mut self) {
        self.trades_today = self.trades_today.saturating_sub(1);
        self.hourly.pop_back();
    }

    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.current_date {
            info!(date = %today, "Risk counters rolled");
            self.current_date = today;
            self.trades_today = 0;
        }
    }
}

#[async_trait]
impl Worker for RiskManagerWorker {
    type Msg = RiskMsg;

    fn name(&self) -> String {
        "risk-manager".to_string()
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        // Persisted overrides win over the configured defaults.
        if let Some(repo) = &self.settings {
            for name in RiskParameterName::ALL {
                match repo.get(name.as_str()).await {
                    Ok(Some(raw)) => {
                        if let Ok(value) = raw.parse::<f64>() {
                            self.params.set(name, value);
                            info!(parameter = name.as_str(), value, "Risk override restored");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(parameter = name.as_str(), "Settings read failed: {e}")
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle(&mut self, msg: RiskMsg) -> anyhow::Result<Flow> {
        match msg {
            RiskMsg::Validate { request, reply } => {
                let verdict = self.validate(&request);
                let _ = reply.send(verdict);
            }
            RiskMsg::SetParameter { name, value } => {
                self.params.set(name, value);
                info!(?name, value, "Risk parameter updated");
                if let Some(repo) = &self.settings
                    && let Err(e) = repo.put(name.as_str(), &value.to_string(), "risk").await
                {
                    tracing::warn!(parameter = name.as_str(), "Settings write failed: {e}");
                }
            }
            RiskMsg::Parameters { reply } => {
                let _ = reply.send(self.params.clone());
            }
            RiskMsg::PlacementFailed => self.revert_approval(),
            RiskMsg::RollDay => self.roll_day(),
        }
        Ok(Flow::Continue)
    }
}
