//! Risk rejection path: no order, unchanged portfolio, a notification that
//! names the violated parameter.

mod common;

use common::{start_system, wait_for, EXCHANGE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use tradecore::application::events::TradingEvent;
use tradecore::application::order_manager::OrderMsg;
use tradecore::application::portfolio_worker::PortfolioMsg;
use tradecore::domain::market::Ticker;
use tradecore::domain::risk::RiskParameters;
use tradecore::domain::trading::types::{IntentAction, OrderType, TradeIntent};
use tradecore::infrastructure::mock::MockExchangeDriver;
use tradecore::runtime::CONTROL_TIMEOUT;

fn buy_intent(quantity: Decimal) -> TradeIntent {
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

#[tokio::test]
async fn test_position_size_rejection_emits_notification() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(100000), Decimal::ZERO).await;
    driver.set_balance("BTC", dec!(0.4), Decimal::ZERO).await;
    driver.set_position("BTC/USDT", dec!(0.4), dec!(45000)).await;

    let mut risk = RiskParameters::default();
    risk.max_position_size = dec!(0.5);

    let system = start_system(Vec::new(), None, risk, driver.clone()).await;
    let mut events = system.handle.subscribe_events();

    // Current position 0.4, intent 0.2: would reach 0.6 > 0.5.
    system
        .handle
        .order_manager
        .send(OrderMsg::Intent {
            exchange: EXCHANGE.to_string(),
            symbol: "BTC/USDT".to_string(),
            strategy: "test".to_string(),
            intent: buy_intent(dec!(0.2)),
            reference_price: dec!(45000),
        })
        .await
        .unwrap();

    let rejected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(TradingEvent::OrderRejected { violation, symbol, .. }) => {
                    return (violation, symbol);
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("expected a rejection notification");

    assert_eq!(rejected.0.parameter(), "max_position_size");
    assert_eq!(rejected.1, "BTC/USDT");

    // No order was created and the portfolio is untouched.
    assert_eq!(system.driver.placed_count().await, 0);
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
    assert_eq!(snapshot.position_qty("BTC/USDT"), dec!(0.4));

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_approved_intent_places_and_fills() {
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
            symbol: "BTC/USDT".to_string(),
            last_price: 50000.0,
            session_volume: 100.0,
            ts: 1,
        })
        .await;

    system
        .handle
        .order_manager
        .send(OrderMsg::Intent {
            exchange: EXCHANGE.to_string(),
            symbol: "BTC/USDT".to_string(),
            strategy: "test".to_string(),
            intent: buy_intent(dec!(0.1)),
            reference_price: dec!(50000),
        })
        .await
        .unwrap();

    let portfolio = system.handle.portfolio.clone();
    let filled = wait_for(Duration::from_secs(5), || {
        let portfolio = portfolio.clone();
        async move {
            match portfolio
                .request(
                    |reply| PortfolioMsg::Snapshot {
                        exchange: EXCHANGE.to_string(),
                        reply,
                    },
                    CONTROL_TIMEOUT,
                )
                .await
            {
                Ok(snapshot) => snapshot.position_qty("BTC/USDT") == dec!(0.1),
                Err(_) => false,
            }
        }
    })
    .await;
    assert!(filled, "approved intent should fill into a position");
    assert_eq!(system.driver.placed_count().await, 1);

    system.handle.shutdown().await;
}

#[tokio::test]
async fn test_daily_trade_cap_applies_in_sequence() {
    let driver = Arc::new(MockExchangeDriver::new(EXCHANGE));
    driver.set_balance("USDT", dec!(1000000), Decimal::ZERO).await;

    let mut risk = RiskParameters::default();
    risk.max_daily_trades = 2;

    let system = start_system(Vec::new(), None, risk, driver.clone()).await;
    let mut events = system.handle.subscribe_events();

    driver
        .publish_ticker(Ticker {
            symbol: "BTC/USDT".to_string(),
            last_price: 100.0,
            session_volume: 1.0,
            ts: 1,
        })
        .await;

    for _ in 0..3 {
        system
            .handle
            .order_manager
            .send(OrderMsg::Intent {
                exchange: EXCHANGE.to_string(),
                symbol: "BTC/USDT".to_string(),
                strategy: "test".to_string(),
                intent: buy_intent(dec!(1)),
                reference_price: dec!(100),
            })
            .await
            .unwrap();
    }

    let rejected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(TradingEvent::OrderRejected { violation, .. }) => return violation,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("third intent should be rejected");
    assert_eq!(rejected.parameter(), "max_daily_trades");
    assert_eq!(system.driver.placed_count().await, 2);

    system.handle.shutdown().await;
}
