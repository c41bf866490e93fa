//! Authoritative balance and position ledger for one exchange.
//!
//! All mutation goes through [`Ledger`] methods so the balance invariant
//! `total == available + locked` and spot position non-negativity hold after
//! every event. The ledger is plain data owned by the portfolio worker; no
//! other unit holds a reference to it.

use crate::domain::market::split_symbol;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::domain::trading::types::{Fill, OrderSide};

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Balance for {asset} would go negative: need {need}, have {have}")]
    NegativeBalance {
        asset: String,
        need: Decimal,
        have: Decimal,
    },

    #[error("Cannot parse symbol '{symbol}' into base/quote")]
    BadSymbol { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub exchange: String,
    pub asset: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

impl Balance {
    pub fn new(exchange: &str, asset: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            asset: asset.to_string(),
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    fn recompute(&mut self) {
        self.total = self.available + self.locked;
    }

    pub fn deposit(&mut self, amount: Decimal) {
        self.available += amount;
        self.recompute();
    }

    pub fn withdraw(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        // Fills against a resting order consume the reservation first.
        let from_locked = amount.min(self.locked);
        let from_available = amount - from_locked;
        if from_available > self.available {
            return Err(LedgerError::NegativeBalance {
                asset: self.asset.clone(),
                need: amount,
                have: self.available + self.locked,
            });
        }
        self.locked -= from_locked;
        self.available -= from_available;
        self.recompute();
        Ok(())
    }

    pub fn lock(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount > self.available {
            return Err(LedgerError::NegativeBalance {
                asset: self.asset.clone(),
                need: amount,
                have: self.available,
            });
        }
        self.available -= amount;
        self.locked += amount;
        self.recompute();
        Ok(())
    }

    pub fn unlock(&mut self, amount: Decimal) {
        let released = amount.min(self.locked);
        self.locked -= released;
        self.available += released;
        self.recompute();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub exchange: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub updated_at: i64,
}

impl Position {
    pub fn new(exchange: &str, symbol: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.current_price
    }

    fn mark(&mut self, price: Decimal, ts: i64) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.avg_price) * self.quantity;
        self.updated_at = ts;
    }
}

/// Daily P&L roll-up, keyed by UTC date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlRecord {
    pub date: NaiveDate,
    pub realized: Decimal,
    pub unrealized_snapshot: Decimal,
}

/// What a fill did to the ledger. The portfolio worker uses `flattened` to
/// tell the order manager to cancel now-orphaned armed stops.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEffect {
    pub realized_delta: Decimal,
    pub flattened: bool,
}

/// Copied, point-in-time view handed to the risk manager. Never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub exchange: String,
    pub balances: HashMap<String, Balance>,
    pub positions: HashMap<String, Position>,
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub peak_equity: Decimal,
    /// Per-symbol volatility (stddev of recent marked returns).
    pub volatility: HashMap<String, f64>,
}

impl PortfolioSnapshot {
    pub fn position_qty(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn gross_exposure(&self) -> Decimal {
        self.positions.values().map(|p| p.notional()).sum()
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.peak_equity - self.equity) / self.peak_equity;
        dd.to_f64().unwrap_or(0.0).max(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pub exchange: String,
    balances: HashMap<String, Balance>,
    positions: HashMap<String, Position>,
    realized_pnl: Decimal,
    realized_today: Decimal,
    peak_equity: Decimal,
    pnl_history: BTreeMap<NaiveDate, PnlRecord>,
}

impl Ledger {
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            balances: HashMap::new(),
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            realized_today: Decimal::ZERO,
            peak_equity: Decimal::ZERO,
            pnl_history: BTreeMap::new(),
        }
    }

    pub fn balances(&self) -> &HashMap<String, Balance> {
        &self.balances
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn realized_today(&self) -> Decimal {
        self.realized_today
    }

    pub fn pnl_history(&self) -> &BTreeMap<NaiveDate, PnlRecord> {
        &self.pnl_history
    }

    pub fn deposit(&mut self, asset: &str, amount: Decimal) {
        let exchange = self.exchange.clone();
        self.balances
            .entry(asset.to_string())
            .or_insert_with(|| Balance::new(&exchange, asset))
            .deposit(amount);
    }

    pub fn lock(&mut self, asset: &str, amount: Decimal) -> Result<(), LedgerError> {
        match self.balances.get_mut(asset) {
            Some(balance) => balance.lock(amount),
            None => Err(LedgerError::NegativeBalance {
                asset: asset.to_string(),
                need: amount,
                have: Decimal::ZERO,
            }),
        }
    }

    pub fn unlock(&mut self, asset: &str, amount: Decimal) {
        if let Some(balance) = self.balances.get_mut(asset) {
            balance.unlock(amount);
        }
    }

    /// Applies one fill atomically: both balance legs and the position move,
    /// or (on a would-be-negative balance) nothing does.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<FillEffect, LedgerError> {
        let (base, quote) = split_symbol(&fill.symbol).ok_or_else(|| LedgerError::BadSymbol {
            symbol: fill.symbol.clone(),
        })?;
        let gross = fill.quantity * fill.price;
        let exchange = self.exchange.clone();

        // Check the debit leg before touching anything.
        match fill.side {
            OrderSide::Buy => {
                let cost = gross + fill.fee;
                let have = self
                    .balances
                    .get(quote)
                    .map(|b| b.available + b.locked)
                    .unwrap_or(Decimal::ZERO);
                if cost > have {
                    return Err(LedgerError::NegativeBalance {
                        asset: quote.to_string(),
                        need: cost,
                        have,
                    });
                }
            }
            OrderSide::Sell => {
                let have = self
                    .balances
                    .get(base)
                    .map(|b| b.available + b.locked)
                    .unwrap_or(Decimal::ZERO);
                if fill.quantity > have {
                    return Err(LedgerError::NegativeBalance {
                        asset: base.to_string(),
                        need: fill.quantity,
                        have,
                    });
                }
            }
        }

        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::new(&exchange, &fill.symbol));

        let mut realized_delta = Decimal::ZERO;
        match fill.side {
            OrderSide::Buy => {
                let old_qty = position.quantity;
                let new_qty = old_qty + fill.quantity;
                position.avg_price = if new_qty > Decimal::ZERO {
                    (old_qty * position.avg_price + fill.quantity * fill.price) / new_qty
                } else {
                    Decimal::ZERO
                };
                position.quantity = new_qty;
            }
            OrderSide::Sell => {
                let old_qty = position.quantity;
                let closing = fill.quantity.min(old_qty);
                realized_delta = (fill.price - position.avg_price) * closing - fill.fee;
                position.quantity = (old_qty - fill.quantity).max(Decimal::ZERO);
                if position.quantity.is_zero() {
                    position.avg_price = Decimal::ZERO;
                }
            }
        }
        position.mark(fill.price, fill.ts);
        let flattened = position.is_flat() && fill.side == OrderSide::Sell;

        match fill.side {
            OrderSide::Buy => {
                let cost = gross + fill.fee;
                self.balances
                    .get_mut(quote)
                    .expect("checked above")
                    .withdraw(cost)?;
                self.balances
                    .entry(base.to_string())
                    .or_insert_with(|| Balance::new(&exchange, base))
                    .deposit(fill.quantity);
            }
            OrderSide::Sell => {
                self.balances
                    .get_mut(base)
                    .expect("checked above")
                    .withdraw(fill.quantity)?;
                self.balances
                    .entry(quote.to_string())
                    .or_insert_with(|| Balance::new(&exchange, quote))
                    .deposit(gross - fill.fee);
            }
        }

        self.realized_pnl += realized_delta;
        self.realized_today += realized_delta;

        Ok(FillEffect {
            realized_delta,
            flattened,
        })
    }

    /// Remarks open positions against fresh prices.
    pub fn mark_prices(&mut self, prices: &HashMap<String, Decimal>, ts: i64) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(price) = prices.get(symbol) {
                position.mark(*price, ts);
            }
        }
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    /// Cash plus marked position value across all assets. Quote-denominated
    /// balances count at face value; base assets are carried inside their
    /// positions' marks.
    pub fn equity(&self) -> Decimal {
        let held: std::collections::HashSet<&str> = self
            .positions
            .keys()
            .filter_map(|s| split_symbol(s).map(|(base, _)| base))
            .collect();
        let cash: Decimal = self
            .balances
            .values()
            .filter(|b| !held.contains(b.asset.as_str()))
            .map(|b| b.total)
            .sum();
        cash + self.positions.values().map(|p| p.notional()).sum::<Decimal>()
    }

    /// Snapshots today's cumulative P&L into `pnl_history[date]` and resets
    /// the day-scoped counters. Idempotent per date.
    pub fn roll_day(&mut self, date: NaiveDate) -> PnlRecord {
        let record = PnlRecord {
            date,
            realized: self.realized_today,
            unrealized_snapshot: self.unrealized_pnl(),
        };
        self.pnl_history.insert(date, record.clone());
        self.realized_today = Decimal::ZERO;
        record
    }

    /// Reconciles against a driver snapshot. The driver is ground truth for
    /// `available`/`locked`. Locally tracked `avg_price` survives when the
    /// driver agrees on quantity; otherwise the driver's cost basis is used
    /// when it reports one, falling back to the current mark.
    pub fn reconcile(&mut self, driver_balances: Vec<Balance>, driver_positions: Vec<Position>) {
        for incoming in driver_balances {
            let entry = self
                .balances
                .entry(incoming.asset.clone())
                .or_insert_with(|| Balance::new(&incoming.exchange, &incoming.asset));
            entry.available = incoming.available;
            entry.locked = incoming.locked;
            entry.recompute();
        }

        for incoming in driver_positions {
            let entry = self
                .positions
                .entry(incoming.symbol.clone())
                .or_insert_with(|| Position::new(&incoming.exchange, &incoming.symbol));
            if entry.quantity != incoming.quantity {
                entry.avg_price = if incoming.avg_price > Decimal::ZERO {
                    incoming.avg_price
                } else if entry.current_price > Decimal::ZERO {
                    entry.current_price
                } else {
                    incoming.current_price
                };
                entry.quantity = incoming.quantity;
            }
            if incoming.current_price > Decimal::ZERO {
                let ts = incoming.updated_at;
                entry.mark(incoming.current_price, ts);
            }
        }
    }

    pub fn snapshot(&self, volatility: HashMap<String, f64>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            exchange: self.exchange.clone(),
            balances: self.balances.clone(),
            positions: self.positions.clone(),
            equity: self.equity(),
            daily_pnl: self.realized_today + self.unrealized_pnl(),
            peak_equity: self.peak_equity,
            volatility,
        }
    }

    /// Consistency check used by tests and the worker's debug assertions.
    pub fn balances_consistent(&self) -> bool {
        self.balances
            .values()
            .all(|b| b.total == b.available + b.locked && b.available >= Decimal::ZERO)
    }
}
