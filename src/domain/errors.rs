use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while assembling a worker from operator configuration.
/// All of these are fatal at spawn time: the affected worker is not created.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("Strategy script not found: {path}")]
    MissingScript { path: String },

    #[error("Unrecognized interval '{interval}' (expected one of 1m, 5m, 15m, 1h, 4h, 1d)")]
    InvalidInterval { interval: String },

    #[error("Malformed override for '{key}': {reason}")]
    MalformedOverride { key: String, reason: String },
}

/// Errors surfaced by an `ExchangeDriver`.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Retry with backoff, then surface to the caller.
    #[error("Transient driver failure: {reason}")]
    Transient { reason: String },

    /// Fatal. The owning exchange worker disconnects and stays down.
    #[error("Authentication failure: {reason}")]
    AuthFailure { reason: String },

    /// Returned to the caller as-is (bad request, unknown order, ...).
    #[error("Driver invariant violation: {reason}")]
    Invariant { reason: String },

    #[error("Driver is not connected")]
    NotConnected,
}

/// Errors quarantined at the script-substrate boundary. Only `Syntax` is
/// fatal (the strategy is never spawned); everything else leaves the
/// strategy alive and resolves the callback to `hold`.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script parse error: {reason}")]
    Syntax { reason: String },

    #[error("settings() rejected: {reason}")]
    Settings { reason: String },

    #[error("Script runtime error in {callback}: {reason}")]
    Runtime { callback: String, reason: String },

    #[error("Callback {callback} exceeded its {budget} budget")]
    Budget { callback: String, budget: String },

    #[error("Script attempted to rebind host binding '{name}'")]
    FrozenGlobal { name: String },
}

/// Failures of the runtime `request` round trip.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request to {worker} timed out after {timeout_ms}ms")]
    Timeout { worker: String, timeout_ms: u64 },

    #[error("Worker {worker} is dead")]
    DeadActor { worker: String },
}

/// Risk rejection detail. Not an error: a first-class outcome reported to
/// the intent originator together with the offending intent.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskViolation {
    #[error("max_position_size: {symbol} would reach {would_be} > {limit}")]
    MaxPositionSize {
        symbol: String,
        would_be: Decimal,
        limit: Decimal,
    },

    #[error("max_daily_loss: projected loss {projected} > {limit}")]
    MaxDailyLoss { projected: Decimal, limit: Decimal },

    #[error("max_portfolio_risk: exposure ratio {ratio:.4} > {limit:.4}")]
    MaxPortfolioRisk { ratio: f64, limit: f64 },

    #[error("max_leverage: {leverage:.4} > {limit:.4}")]
    MaxLeverage { leverage: f64, limit: f64 },

    #[error("max_daily_trades: {count} today >= {limit}")]
    MaxDailyTrades { count: u32, limit: u32 },

    #[error("max_hourly_trades: {count} in the last hour >= {limit}")]
    MaxHourlyTrades { count: u32, limit: u32 },

    #[error("var_limit: 95% VaR {var:.2} > {limit:.2}")]
    VarLimit { var: f64, limit: f64 },

    #[error("max_drawdown_limit: drawdown {drawdown:.4} > {limit:.4}, flat-only mode")]
    MaxDrawdown { drawdown: f64, limit: f64 },

    #[error("concentration_limit: {symbol} at {ratio:.4} of equity > {limit:.4}")]
    Concentration {
        symbol: String,
        ratio: f64,
        limit: f64,
    },

    #[error("Insufficient {asset} balance: need {need}, available {available}")]
    InsufficientBalance {
        asset: String,
        need: Decimal,
        available: Decimal,
    },
}

impl RiskViolation {
    /// Name of the parameter that produced this rejection, as reported in
    /// `OrderRejected` notifications.
    pub fn parameter(&self) -> &'static str {
        match self {
            RiskViolation::MaxPositionSize { .. } => "max_position_size",
            RiskViolation::MaxDailyLoss { .. } => "max_daily_loss",
            RiskViolation::MaxPortfolioRisk { .. } => "max_portfolio_risk",
            RiskViolation::MaxLeverage { .. } => "max_leverage",
            RiskViolation::MaxDailyTrades { .. } => "max_daily_trades",
            RiskViolation::MaxHourlyTrades { .. } => "max_hourly_trades",
            RiskViolation::VarLimit { .. } => "var_limit",
            RiskViolation::MaxDrawdown { .. } => "max_drawdown_limit",
            RiskViolation::Concentration { .. } => "concentration_limit",
            RiskViolation::InsufficientBalance { .. } => "balance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_violation_formatting() {
        let violation = RiskViolation::MaxPositionSize {
            symbol: "BTC/USDT".to_string(),
            would_be: dec!(0.6),
            limit: dec!(0.5),
        };

        let msg = violation.to_string();
        assert!(msg.contains("BTC/USDT"));
        assert!(msg.contains("0.6"));
        assert!(msg.contains("0.5"));
        assert_eq!(violation.parameter(), "max_position_size");
    }

    #[test]
    fn test_request_error_formatting() {
        let err = RequestError::Timeout {
            worker: "risk".to_string(),
            timeout_ms: 2000,
        };
        assert!(err.to_string().contains("2000"));
    }
}
