use crate::domain::errors::RiskViolation;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Mutable, process-lifetime risk thresholds. Bound to defaults at startup
/// and to operator overrides via `SetParameter` messages.
///
/// `max_correlation` is advisory: the rebalance path reads it, the
/// single-order validation path does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Upper bound on |position qty| per symbol, in base units.
    pub max_position_size: Decimal,
    /// Upper bound on today's realized + unrealized loss, quote units.
    pub max_daily_loss: Decimal,
    /// Upper bound on gross position notional / equity.
    pub max_portfolio_risk: f64,
    pub max_correlation: f64,
    /// Upper bound on post-fill notional / equity.
    pub max_leverage: f64,
    pub max_daily_trades: u32,
    pub max_hourly_trades: u32,
    /// Upper bound on post-fill 95% portfolio VaR, quote units.
    pub var_limit: f64,
    /// Peak-to-trough equity ratio beyond which only flattening trades pass.
    pub max_drawdown_limit: f64,
    /// Upper bound on any single symbol's notional / equity.
    pub concentration_limit: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_position_size: dec!(1000000),
            max_daily_loss: dec!(1000000),
            max_portfolio_risk: 1.0,
            max_correlation: 0.8,
            max_leverage: 1.0,
            max_daily_trades: 1000,
            max_hourly_trades: 200,
            var_limit: f64::MAX,
            max_drawdown_limit: 1.0,
            concentration_limit: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskParameterName {
    MaxPositionSize,
    MaxDailyLoss,
    MaxPortfolioRisk,
    MaxCorrelation,
    MaxLeverage,
    MaxDailyTrades,
    MaxHourlyTrades,
    VarLimit,
    MaxDrawdownLimit,
    ConcentrationLimit,
}

impl RiskParameterName {
    pub const ALL: [RiskParameterName; 10] = [
        RiskParameterName::MaxPositionSize,
        RiskParameterName::MaxDailyLoss,
        RiskParameterName::MaxPortfolioRisk,
        RiskParameterName::MaxCorrelation,
        RiskParameterName::MaxLeverage,
        RiskParameterName::MaxDailyTrades,
        RiskParameterName::MaxHourlyTrades,
        RiskParameterName::VarLimit,
        RiskParameterName::MaxDrawdownLimit,
        RiskParameterName::ConcentrationLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskParameterName::MaxPositionSize => "max_position_size",
            RiskParameterName::MaxDailyLoss => "max_daily_loss",
            RiskParameterName::MaxPortfolioRisk => "max_portfolio_risk",
            RiskParameterName::MaxCorrelation => "max_correlation",
            RiskParameterName::MaxLeverage => "max_leverage",
            RiskParameterName::MaxDailyTrades => "max_daily_trades",
            RiskParameterName::MaxHourlyTrades => "max_hourly_trades",
            RiskParameterName::VarLimit => "var_limit",
            RiskParameterName::MaxDrawdownLimit => "max_drawdown_limit",
            RiskParameterName::ConcentrationLimit => "concentration_limit",
        }
    }
}

impl RiskParameters {
    pub fn set(&mut self, name: RiskParameterName, value: f64) {
        use rust_decimal::prelude::FromPrimitive;
        match name {
            RiskParameterName::MaxPositionSize => {
                if let Some(v) = Decimal::from_f64(value) {
                    self.max_position_size = v;
                }
            }
            RiskParameterName::MaxDailyLoss => {
                if let Some(v) = Decimal::from_f64(value) {
                    self.max_daily_loss = v;
                }
            }
            RiskParameterName::MaxPortfolioRisk => self.max_portfolio_risk = value,
            RiskParameterName::MaxCorrelation => self.max_correlation = value,
            RiskParameterName::MaxLeverage => self.max_leverage = value,
            RiskParameterName::MaxDailyTrades => self.max_daily_trades = value as u32,
            RiskParameterName::MaxHourlyTrades => self.max_hourly_trades = value as u32,
            RiskParameterName::VarLimit => self.var_limit = value,
            RiskParameterName::MaxDrawdownLimit => self.max_drawdown_limit = value,
            RiskParameterName::ConcentrationLimit => self.concentration_limit = value,
        }
    }
}

/// Outcome of pre-trade validation. Rejection is reported, never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    Approve,
    Reject(RiskViolation),
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_permissive() {
        let params = RiskParameters::default();
        assert!(params.max_daily_trades >= 100);
        assert!(params.max_drawdown_limit >= 1.0);
    }

    #[test]
    fn test_set_by_name() {
        let mut params = RiskParameters::default();
        params.set(RiskParameterName::MaxPositionSize, 0.5);
        assert_eq!(params.max_position_size, dec!(0.5));

        params.set(RiskParameterName::MaxDailyTrades, 10.0);
        assert_eq!(params.max_daily_trades, 10);

        params.set(RiskParameterName::MaxLeverage, 2.0);
        assert_eq!(params.max_leverage, 2.0);
    }
}
