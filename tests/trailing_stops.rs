//! Client-side trailing stop synthesis against live price updates.

mod common;

use common::{start_system, wait_for, EXCHANGE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use tradecore::application::order_manager::OrderMsg;
use tradecore::application::portfolio_worker::PortfolioMsg;
use tradecore::domain::market::Ticker;
use tradecore::domain::risk::RiskParameters;
use tradecore::domain::trading::types::{IntentAction, OrderType, TradeIntent};
use tradecore::infrastructure::mock::MockExchangeDriver;
use tradecore::runtime::CONTROL_TIMEOUT;

fn ticker(price: f64, ts: i64) -> Ticker {
    Ticker {
        symbol: "BTC/USDT".to_string(),
        last_price: price,
        session_volume: 1.0,
        ts,
    }
}

fn entry_with_trail(quantity: Decimal, trail_percent: f64) -> TradeIntent {
    TradeIntent {
        action: IntentAction::Buy,
        quantity,
        price: None,
        order_type: OrderType::Market,
        reason: "entry with trail".to_string(),
        stop_price: None,
        stop_limit_price: None,
        trail_percent: Some(trail_percent),
        take_profit: None,
    }
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
        .map(|s| s.position_qty("BTC/USDT"))
        .unwrap_or(Decimal::ZERO)
}

#[tokio::test]
async fn test_trailing_stop_rides_peak_and_exits() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    driver.publish_ticker(ticker(45000.0, 1)).await;

    // Enter long 0.5 with a 2% trailing stop armed alongside.
    system
        .handle
        .order_manager
        .send(OrderMsg::Intent {
            exchange: EXCHANGE.to_string(),
            symbol: "BTC/USDT".to_string(),
            strategy: "test".to_string(),
            intent: entry_with_trail(dec!(0.5), 2.0),
            reference_price: dec!(45000),
        })
        .await
        .unwrap();

    let entered = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move { position_qty(system).await == dec!(0.5) }
    })
    .await;
    assert!(entered, "entry fill should open the position");

    // Ride up: peak reaches 46000, so the stop sits at 46000 * 0.98 = 45080.
    for (i, price) in [45100.0, 45500.0, 46000.0].iter().enumerate() {
        driver.publish_ticker(ticker(*price, 2 + i as i64)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(position_qty(&system).await, dec!(0.5), "stop must not fire early");

    // The pullback to exactly the threshold fires the market exit.
    driver.publish_ticker(ticker(45080.0, 10)).await;

    let exited = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move { position_qty(system).await == Decimal::ZERO }
    })
    .await;
    assert!(exited, "trailing stop should flatten the position");

    let snapshot = system
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
        .unwrap();
    let position = &snapshot.positions["BTC/USDT"];
    assert_eq!(position.quantity, Decimal::ZERO);
    assert_eq!(position.avg_price, Decimal::ZERO);

    // Entry + stop exit.
    assert_eq!(system.driver.placed_count().await, 2);

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_at_most_one_trailing_stop_per_side() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    driver.publish_ticker(ticker(100.0, 1)).await;

    for _ in 0..2 {
        system
            .handle
            .order_manager
            .send(OrderMsg::Intent {
                exchange: EXCHANGE.to_string(),
                symbol: "BTC/USDT".to_string(),
                strategy: "test".to_string(),
                intent: entry_with_trail(dec!(0.1), 5.0),
                reference_price: dec!(100),
            })
            .await
            .unwrap();
    }

    let converged = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move { position_qty(system).await == dec!(0.2) }
    })
    .await;
    assert!(converged);

    let open = system
        .handle
        .order_manager
        .request(|reply| OrderMsg::OpenOrders { reply }, CONTROL_TIMEOUT)
        .await
        .unwrap();
    let trailing: Vec<_> = open
        .iter()
        .filter(|o| o.order_type == OrderType::TrailingStop)
        .collect();
    assert_eq!(trailing.len(), 1, "second arm replaces the first");

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_orphaned_stop_cancelled_on_flatten() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;

    let system = start_system(
        Vec::new(),
        None,
        RiskParameters::default(),
        driver.clone(),
    )
    .await;

    driver.publish_ticker(ticker(100.0, 1)).await;
    system
        .handle
        .order_manager
        .send(OrderMsg::Intent {
            exchange: EXCHANGE.to_string(),
            symbol: "BTC/USDT".to_string(),
            strategy: "test".to_string(),
            intent: entry_with_trail(dec!(0.5), 5.0),
            reference_price: dec!(100),
        })
        .await
        .unwrap();

    let entered = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move { position_qty(system).await == dec!(0.5) }
    })
    .await;
    assert!(entered);

    // Manual full exit; the armed trailing stop is now orphaned.
    system
        .handle
        .order_manager
        .send(OrderMsg::Intent {
            exchange: EXCHANGE.to_string(),
            symbol: "BTC/USDT".to_string(),
            strategy: "test".to_string(),
            intent: TradeIntent {
                action: IntentAction::Sell,
                quantity: dec!(0.5),
                price: None,
                order_type: OrderType::Market,
                reason: "manual exit".to_string(),
                stop_price: None,
                stop_limit_price: None,
                trail_percent: None,
                take_profit: None,
            },
            reference_price: dec!(100),
        })
        .await
        .unwrap();

    let cleaned = wait_for(Duration::from_secs(5), || {
        let system = &system;
        async move {
            if position_qty(system).await != Decimal::ZERO {
                return false;
            }
            match system
                .handle
                .order_manager
                .request(|reply| OrderMsg::OpenOrders { reply }, CONTROL_TIMEOUT)
                .await
            {
                Ok(open) => !open.iter().any(|o| o.order_type == OrderType::TrailingStop),
                Err(_) => false,
            }
        }
    })
    .await;
    assert!(cleaned, "flattening must cancel the armed trailing stop");

    system.handle.shutdown().await;
}
