use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
    TrailingStop,
    TakeProfit,
}

impl OrderType {
    /// Stop-family orders are retained client-side as armed orders until
    /// their trigger condition is met.
    pub fn is_armed(&self) -> bool {
        matches!(
            self,
            OrderType::StopMarket
                | OrderType::StopLimit
                | OrderType::TrailingStop
                | OrderType::TakeProfit
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::TrailingStop => write!(f, "TRAILING_STOP"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Armed stop/trailing/take-profit waiting for its trigger.
    Armed,
    /// Submitted, awaiting driver ack.
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Stopped,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Armed => "ARMED",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Stopped => "STOPPED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentAction {
    Buy,
    Sell,
    Hold,
}

/// A strategy's request to trade, prior to risk validation.
///
/// This is the structured form of the map a script callback returns. A
/// missing or malformed return resolves to `TradeIntent::hold()`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub action: IntentAction,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub reason: String,
    pub stop_price: Option<Decimal>,
    pub stop_limit_price: Option<Decimal>,
    pub trail_percent: Option<f64>,
    pub take_profit: Option<Decimal>,
}

impl TradeIntent {
    pub fn hold() -> Self {
        Self {
            action: IntentAction::Hold,
            quantity: Decimal::ZERO,
            price: None,
            order_type: OrderType::Market,
            reason: String::new(),
            stop_price: None,
            stop_limit_price: None,
            trail_percent: None,
            take_profit: None,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == IntentAction::Hold || self.quantity <= Decimal::ZERO
    }

    pub fn side(&self) -> Option<OrderSide> {
        match self.action {
            IntentAction::Buy => Some(OrderSide::Buy),
            IntentAction::Sell => Some(OrderSide::Sell),
            IntentAction::Hold => None,
        }
    }
}

/// A validated, submitted (or armed) request at the exchange boundary.
/// Identity is `client_id`; `exchange_id` is assigned on driver ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_id: String,
    pub exchange_id: Option<String>,
    pub exchange: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub stop_price: Option<Decimal>,
    pub trail_percent: Option<f64>,
    pub take_profit_price: Option<Decimal>,
    pub reason: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    pub fn new(
        exchange: &str,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        reason: String,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            client_id: Uuid::new_v4().to_string(),
            exchange_id: None,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            filled_quantity: Decimal::ZERO,
            price,
            status: if order_type.is_armed() {
                OrderStatus::Armed
            } else {
                OrderStatus::Pending
            },
            stop_price: None,
            trail_percent: None,
            take_profit_price: None,
            reason,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }
}

/// An executed fill. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: i64,
}
