//! Rebalance host: drift-ordered planning, per-invocation execution cap,
//! and status reporting.

mod common;

use common::{demo_script, start_system, EXCHANGE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tradecore::application::events::TradingEvent;
use tradecore::application::rebalance::RebalanceMsg;
use tradecore::config::{ConfigValue, RebalanceSpec};
use tradecore::domain::market::Ticker;
use tradecore::domain::risk::RiskParameters;
use tradecore::infrastructure::mock::MockExchangeDriver;
use tradecore::runtime::CONTROL_TIMEOUT;

fn ticker(symbol: &str, price: f64, ts: i64) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        last_price: price,
        session_volume: 1.0,
        ts,
    }
}

#[tokio::test]
async fn test_rebalance_caps_trades_largest_drift_first() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    // All value sits in cash: every target symbol drifts by its full
    // weight (BTC 0.40 > ETH 0.30 > SOL 0.20), all above the 5% threshold.
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let mut overrides = HashMap::new();
    overrides.insert("rebalance_interval".to_string(), ConfigValue::Int(1));
    let rebalance = RebalanceSpec {
        exchange: EXCHANGE.to_string(),
        script_path: demo_script("rebalance.rhai"),
        overrides,
    };

    let system = start_system(
        Vec::new(),
        Some(rebalance),
        RiskParameters::default(),
        driver.clone(),
    )
    .await;
    let mut events = system.handle.subscribe_events();

    // Marks for every target symbol so the host can price the plan.
    driver.publish_ticker(ticker("BTC/USDT", 50000.0, 1)).await;
    driver.publish_ticker(ticker("ETH/USDT", 3000.0, 2)).await;
    driver.publish_ticker(ticker("SOL/USDT", 150.0, 3)).await;

    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(TradingEvent::RebalanceCompleted {
                    trades_executed,
                    total_trades_planned,
                }) if total_trades_planned > 0 => {
                    return (trades_executed, total_trades_planned);
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("rebalance should run within the timer interval");

    // Three drifted symbols planned, capped at max_trades_per_rebalance = 2.
    assert_eq!(completed.1, 3);
    assert_eq!(completed.0, 2);

    // The two largest drifts (BTC, ETH) were the ones executed.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let placed: HashSet<String> = driver
        .placed_orders()
        .await
        .into_iter()
        .map(|o| o.symbol)
        .collect();
    assert_eq!(
        placed,
        HashSet::from(["BTC/USDT".to_string(), "ETH/USDT".to_string()])
    );
    assert_eq!(system.driver.placed_count().await, 2);

    let status = system
        .handle
        .rebalance
        .as_ref()
        .expect("rebalance worker exists")
        .request(|reply| RebalanceMsg::Status { reply }, CONTROL_TIMEOUT)
        .await
        .unwrap();
    assert!(status.runs >= 1);
    assert_eq!(status.last_planned, 3);
    assert_eq!(status.last_executed, 2);

    system.handle.shutdown().await;
}
