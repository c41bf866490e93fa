//! Order lifecycle: partial fills, cancellation round trip, placement
//! retries with backoff.

mod common;

use common::{start_system, wait_for, EXCHANGE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tradecore::infrastructure::driver::ExchangeDriver;

use tradecore::application::order_manager::OrderMsg;
use tradecore::application::portfolio_worker::PortfolioMsg;
use tradecore::domain::market::Ticker;
use tradecore::domain::risk::RiskParameters;
use tradecore::domain::trading::types::{IntentAction, OrderStatus, OrderType, TradeIntent};
use tradecore::infrastructure::mock::MockExchangeDriver;
use tradecore::runtime::CONTROL_TIMEOUT;

fn market_buy(quantity: Decimal) -> TradeIntent {
    TradeIntent {
        action: IntentAction::Buy,
        quantity,
        price: None,
        order_type: OrderType::Market,
        reason: "test".to_string(),
        stop_price: None,
        stop_limit_price: None,
        trail_percent: None,
        take_profit: None,
    }
}

async fn send_buy(system: &common::TestSystem, quantity: Decimal, price: Decimal) {
    system
        .handle
        .order_manager
        .send(OrderMsg::Intent {
            exchange: EXCHANGE.to_string(),
            symbol: "ETH/USDT".to_string(),
            strategy: "test".to_string(),
            intent: market_buy(quantity),
            reference_price: price,
        })
        .await
        .unwrap();
}

async fn position_qty(system: &common::TestSystem) -> Decimal {
    system
        .handle
        .portfolio
        .request(
            |reply| PortfolioMsg::Snapshot {
                exchange: EXCHANGE.to_string(),
                reply,
            },
            CONTROL_TIMEOUT,
        )
        .await
        .map(|s| s.position_qty("ETH/USDT"))
        .unwrap_or(Decimal::ZERO)
}

#[tokio::test]
async fn test_partial_fills_update_position_incrementally() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE).with_manual_fills());
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    send_buy(&system, dec!(10), dec!(3000)).await;

    let placed = wait_for(Duration::from_secs(5), || {
        let driver = driver.clone();
        async move { driver.placed_count().await == 1 }
    })
    .await;
    assert!(placed);
    let client_id = driver.placed_orders().await[0].client_id.clone();

    driver.emit_fill(&client_id, dec!(4), dec!(3000)).await;
    let partial = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move { position_qty(system).await == dec!(4) }
    })
    .await;
    assert!(partial, "partial fill should move the position by its quantity");

    // The residual stays working as partially filled.
    let open = system
        .handle
        .order_manager
        .request(|reply| OrderMsg::OpenOrders { reply }, CONTROL_TIMEOUT)
        .await
        .unwrap();
    let order = open
        .iter()
        .find(|o| o.client_id == client_id)
        .expect("residual order still tracked");
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.remaining_quantity(), dec!(6));

    driver.emit_fill(&client_id, dec!(6), dec!(3000)).await;
    let complete = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move { position_qty(system).await == dec!(10) }
    })
    .await;
    assert!(complete);

    let open = system
        .handle
        .order_manager
        .request(|reply| OrderMsg::OpenOrders { reply }, CONTROL_TIMEOUT)
        .await
        .unwrap();
    assert!(!open.iter().any(|o| o.client_id == client_id));

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_place_then_cancel_leaves_no_open_order() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE).with_manual_fills());
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    send_buy(&system, dec!(1), dec!(3000)).await;
    let placed = wait_for(Duration::from_secs(5), || {
        let driver = driver.clone();
        async move { driver.placed_count().await == 1 }
    })
    .await;
    assert!(placed);
    let client_id = driver.placed_orders().await[0].client_id.clone();

    let cancelled = system
        .handle
        .order_manager
        .request(
            |reply| OrderMsg::Cancel {
                client_id: client_id.clone(),
                reply,
            },
            CONTROL_TIMEOUT,
        )
        .await
        .unwrap();
    assert!(cancelled);

    let gone = wait_for(Duration::from_secs(5), || {
        let driver = driver.clone();
        let client_id = client_id.clone();
        async move {
            !driver
                .get_open_orders("ETH/USDT")
                .await
                .unwrap()
                .iter()
                .any(|o| o.client_id == client_id)
        }
    })
    .await;
    assert!(gone, "cancelled order must not appear among open orders");

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    driver
        .publish_ticker(Ticker {
            symbol: "ETH/USDT".to_string(),
            last_price: 3000.0,
            session_volume: 1.0,
            ts: 1,
        })
        .await;

    // First two attempts fail transiently; the third succeeds under the
    // backoff schedule.
    driver.fail_next_placements(2);
    send_buy(&system, dec!(1), dec!(3000)).await;

    let filled = wait_for(Duration::from_secs(10), || {
        let system = &system;
        async move { position_qty(system).await == dec!(1) }
    })
    .await;
    assert!(filled, "placement should succeed on the final retry");

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_reject_without_position() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    driver.fail_next_placements(10);
    send_buy(&system, dec!(1), dec!(3000)).await;

    // Give the full backoff schedule time to burn through.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(position_qty(&system).await, Decimal::ZERO);
    assert_eq!(system.driver.placed_count().await, 0);

    system.handle.shutdown().await;
}
