//! Notifications fanned out to observers (logs, tests, future surfaces).

use crate::domain::errors::RiskViolation;
use crate::domain::trading::types::{Fill, Order};

#[derive(Debug, Clone)]
pub enum TradingEvent {
    OrderPlaced {
        order: Order,
    },
    /// A risk rejection: first-class outcome, not an error. Carries the
    /// offending intent summary, the validating parameter and the value
    /// that tripped it.
    OrderRejected {
        exchange: String,
        symbol: String,
        strategy: String,
        intent: String,
        violation: RiskViolation,
    },
    OrderFilled {
        fill: Fill,
    },
    StopTriggered {
        client_id: String,
        symbol: String,
        trigger_price: f64,
    },
    RebalanceCompleted {
        trades_executed: usize,
        total_trades_planned: usize,
    },
}
