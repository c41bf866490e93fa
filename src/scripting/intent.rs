//! Structured extraction of trade intents from script return values.
//!
//! A callback's return contract is a map with a mandatory `action` of
//! `buy`/`sell`/`hold`. Anything else (missing return, wrong type, unknown
//! action, non-finite numbers) resolves to hold; the caller logs it.

use crate::domain::trading::types::{IntentAction, OrderSide, OrderType, TradeIntent};
use rhai::{Dynamic, Map};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

fn as_f64(value: &Dynamic) -> Option<f64> {
    if let Ok(f) = value.as_float() {
        Some(f)
    } else {
        value.as_int().ok().map(|i| i as f64)
    }
}

fn as_decimal(value: &Dynamic) -> Option<Decimal> {
    let f = as_f64(value)?;
    if !f.is_finite() {
        return None;
    }
    Decimal::from_f64(f)
}

fn as_string(value: &Dynamic) -> Option<String> {
    value.clone().into_string().ok()
}

fn field_decimal(map: &Map, key: &str) -> Option<Decimal> {
    map.get(key).and_then(as_decimal)
}

/// Parses a callback return map. `None` means the return was structurally
/// invalid and must be treated as hold.
pub fn parse_intent(map: &Map) -> Option<TradeIntent> {
    let action = match as_string(map.get("action")?)?.to_lowercase().as_str() {
        "buy" => IntentAction::Buy,
        "sell" => IntentAction::Sell,
        "hold" => return Some(TradeIntent::hold()),
        _ => return None,
    };

    let quantity = match map.get("quantity") {
        Some(value) => {
            let q = as_decimal(value)?;
            if q < Decimal::ZERO {
                return None;
            }
            q
        }
        None => Decimal::ZERO,
    };

    let order_type = match map.get("type") {
        Some(value) => match as_string(value)?.to_lowercase().as_str() {
            "market" => OrderType::Market,
            "limit" => OrderType::Limit,
            _ => return None,
        },
        None => OrderType::Market,
    };

    let price = field_decimal(map, "price");
    if order_type == OrderType::Limit && price.is_none() {
        return None;
    }

    let trail_percent = map.get("trail_percent").and_then(as_f64);
    if let Some(t) = trail_percent
        && (!t.is_finite() || t <= 0.0 || t >= 100.0)
    {
        return None;
    }

    let reason = map
        .get("reason")
        .and_then(as_string)
        .unwrap_or_default();

    Some(TradeIntent {
        action,
        quantity,
        price,
        order_type,
        reason,
        stop_price: field_decimal(map, "stop_price"),
        stop_limit_price: field_decimal(map, "stop_limit_price"),
        trail_percent,
        take_profit: field_decimal(map, "take_profit"),
    })
}

/// One order dictionary emitted by a rebalance script.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub reason: String,
}

pub fn parse_rebalance_order(map: &Map) -> Option<RebalanceOrder> {
    let symbol = as_string(map.get("symbol")?)?;
    let side = match as_string(map.get("side")?)?.to_lowercase().as_str() {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        _ => return None,
    };
    let quantity = as_decimal(map.get("qty").or_else(|| map.get("quantity"))?)?;
    if quantity <= Decimal::ZERO {
        return None;
    }
    let order_type = match map.get("type") {
        Some(value) => match as_string(value)?.to_lowercase().as_str() {
            "market" => OrderType::Market,
            "limit" => OrderType::Limit,
            _ => return None,
        },
        None => OrderType::Market,
    };
    let reason = map
        .get("reason")
        .and_then(as_string)
        .unwrap_or_else(|| "rebalance".to_string());
    Some(RebalanceOrder {
        symbol,
        side,
        quantity,
        order_type,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn map_of(pairs: &[(&str, Dynamic)]) -> Map {
        let mut m = Map::new();
        for (k, v) in pairs {
            m.insert((*k).into(), v.clone());
        }
        m
    }

    #[test]
    fn test_parse_buy_intent() {
        let m = map_of(&[
            ("action", Dynamic::from("buy")),
            ("quantity", Dynamic::from_float(0.01)),
            ("reason", Dynamic::from("crossover")),
        ]);
        let intent = parse_intent(&m).unwrap();
        assert_eq!(intent.action, IntentAction::Buy);
        assert_eq!(intent.quantity, dec!(0.01));
        assert_eq!(intent.order_type, OrderType::Market);
        assert_eq!(intent.reason, "crossover");
    }

    #[test]
    fn test_parse_hold_short_circuits() {
        let m = map_of(&[
            ("action", Dynamic::from("hold")),
            ("quantity", Dynamic::from_float(5.0)),
        ]);
        let intent = parse_intent(&m).unwrap();
        assert!(intent.is_hold());
    }

    #[test]
    fn test_unknown_action_is_invalid() {
        let m = map_of(&[("action", Dynamic::from("short"))]);
        assert!(parse_intent(&m).is_none());
    }

    #[test]
    fn test_missing_action_is_invalid() {
        let m = map_of(&[("quantity", Dynamic::from_float(1.0))]);
        assert!(parse_intent(&m).is_none());
    }

    #[test]
    fn test_negative_quantity_is_invalid() {
        let m = map_of(&[
            ("action", Dynamic::from("buy")),
            ("quantity", Dynamic::from_float(-1.0)),
        ]);
        assert!(parse_intent(&m).is_none());
    }

    #[test]
    fn test_limit_requires_price() {
        let m = map_of(&[
            ("action", Dynamic::from("buy")),
            ("quantity", Dynamic::from_float(1.0)),
            ("type", Dynamic::from("limit")),
        ]);
        assert!(parse_intent(&m).is_none());

        let m = map_of(&[
            ("action", Dynamic::from("buy")),
            ("quantity", Dynamic::from_float(1.0)),
            ("type", Dynamic::from("limit")),
            ("price", Dynamic::from_float(100.0)),
        ]);
        let intent = parse_intent(&m).unwrap();
        assert_eq!(intent.order_type, OrderType::Limit);
        assert_eq!(intent.price, Some(dec!(100)));
    }

    #[test]
    fn test_nan_quantity_is_invalid() {
        let m = map_of(&[
            ("action", Dynamic::from("buy")),
            ("quantity", Dynamic::from_float(f64::NAN)),
        ]);
        assert!(parse_intent(&m).is_none());
    }

    #[test]
    fn test_trail_percent_bounds() {
        let m = map_of(&[
            ("action", Dynamic::from("sell")),
            ("quantity", Dynamic::from_float(1.0)),
            ("trail_percent", Dynamic::from_float(2.0)),
        ]);
        assert_eq!(parse_intent(&m).unwrap().trail_percent, Some(2.0));

        let m = map_of(&[
            ("action", Dynamic::from("sell")),
            ("quantity", Dynamic::from_float(1.0)),
            ("trail_percent", Dynamic::from_float(150.0)),
        ]);
        assert!(parse_intent(&m).is_none());
    }

    #[test]
    fn test_integer_quantity_coerces() {
        let m = map_of(&[
            ("action", Dynamic::from("sell")),
            ("quantity", Dynamic::from_int(2)),
        ]);
        assert_eq!(parse_intent(&m).unwrap().quantity, dec!(2));
    }

    #[test]
    fn test_parse_rebalance_order() {
        let m = map_of(&[
            ("symbol", Dynamic::from("BTC/USDT")),
            ("side", Dynamic::from("sell")),
            ("qty", Dynamic::from_float(0.25)),
        ]);
        let order = parse_rebalance_order(&m).unwrap();
        assert_eq!(order.symbol, "BTC/USDT");
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.quantity, dec!(0.25));
        assert_eq!(order.order_type, OrderType::Market);
    }

    #[test]
    fn test_rebalance_order_rejects_zero_qty() {
        let m = map_of(&[
            ("symbol", Dynamic::from("BTC/USDT")),
            ("side", Dynamic::from("buy")),
            ("qty", Dynamic::from_float(0.0)),
        ]);
        assert!(parse_rebalance_order(&m).is_none());
    }
}
