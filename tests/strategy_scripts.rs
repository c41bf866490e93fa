//! The shipped demo scripts, driven bar-by-bar through the script host.

use std::collections::HashMap;
use std::path::PathBuf;

use tradecore::domain::market::{Interval, Kline, KlineBuffer};
use tradecore::domain::trading::types::IntentAction;
use tradecore::scripting::{ScriptHost, DEFAULT_CALLBACK_BUDGET};

fn load_demo(name: &str) -> ScriptHost {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(name);
    let source = std::fs::read_to_string(path).expect("demo script readable");
    ScriptHost::load(name, &source, &HashMap::new(), DEFAULT_CALLBACK_BUDGET)
        .expect("demo script loads")
}

fn kline(open_time: i64, close: f64) -> Kline {
    Kline {
        symbol: "BTC/USDT".to_string(),
        interval: Interval::OneMinute,
        open_time,
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1.0,
    }
}

/// Feeds a close series through a host, returning the emitted actions.
fn drive(host: &ScriptHost, closes: &[f64]) -> Vec<IntentAction> {
    let mut buffer = KlineBuffer::new(host.lookback_hint());
    let mut actions = Vec::new();
    for (i, close) in closes.iter().enumerate() {
        let k = kline(60_000 * (i as i64 + 1), *close);
        buffer.push(k.clone());
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let intent = host.call_on_kline(&k).expect("callback succeeds");
        if !intent.is_hold() {
            actions.push(intent.action);
        }
    }
    actions
}

#[test]
fn test_sma_crossover_single_buy() {
    let host = load_demo("sma_crossover.rhai");
    assert!(host.callbacks.on_kline);
    assert_eq!(host.interval(), Interval::OneMinute);

    let actions = drive(&host, &[100.0, 99.0, 98.0, 101.0, 104.0]);
    assert_eq!(actions, vec![IntentAction::Buy]);
}

#[test]
fn test_sma_crossover_round_trip() {
    let host = load_demo("sma_crossover.rhai");

    // Rally then slide: the cross up buys, the cross back down sells, and
    // the position latch prevents doubling up.
    let mut closes = vec![100.0, 99.0, 98.0, 101.0, 104.0, 107.0, 110.0];
    closes.extend([106.0, 102.0, 98.0, 94.0]);
    let actions = drive(&host, &closes);
    assert_eq!(actions, vec![IntentAction::Buy, IntentAction::Sell]);
}

#[test]
fn test_rsi_reversion_buys_bounce_sells_fade() {
    let host = load_demo("rsi_reversion.rhai");
    assert!(host.callbacks.on_kline);

    // Grind down into oversold, bounce hard (RSI crosses up through 30),
    // rally into overbought, then fade (RSI crosses back under 70).
    let mut closes = Vec::new();
    let mut price = 120.0;
    for _ in 0..20 {
        price -= 1.0;
        closes.push(price);
    }
    for _ in 0..10 {
        price += 5.0;
        closes.push(price);
    }
    for _ in 0..10 {
        price -= 3.0;
        closes.push(price);
    }

    let actions = drive(&host, &closes);
    assert_eq!(
        actions,
        vec![IntentAction::Buy, IntentAction::Sell],
        "one oversold entry and one overbought exit"
    );
}

#[test]
fn test_rsi_reversion_respects_overrides() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/rsi_reversion.rhai");
    let source = std::fs::read_to_string(path).unwrap();
    let mut overrides = HashMap::new();
    overrides.insert(
        "position_size".to_string(),
        tradecore::config::ConfigValue::Float(0.25),
    );
    let host =
        ScriptHost::load("rsi", &source, &overrides, DEFAULT_CALLBACK_BUDGET).unwrap();

    let mut closes = Vec::new();
    let mut price = 120.0;
    for _ in 0..20 {
        price -= 1.0;
        closes.push(price);
    }
    for _ in 0..10 {
        price += 5.0;
        closes.push(price);
    }

    let mut buffer = KlineBuffer::new(0);
    let mut quantity = None;
    for (i, close) in closes.iter().enumerate() {
        let k = kline(60_000 * (i as i64 + 1), *close);
        buffer.push(k.clone());
        host.bind_market("BTC/USDT", "mock", &buffer, None);
        let intent = host.call_on_kline(&k).unwrap();
        if intent.action == IntentAction::Buy {
            quantity = Some(intent.quantity);
            break;
        }
    }
    assert_eq!(quantity, Some(rust_decimal_macros::dec!(0.25)));
}
