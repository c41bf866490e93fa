//! Shared harness: a full system wired against the mock driver.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tradecore::application::system::{Application, SystemHandle};
use tradecore::config::{Config, ConfigValue, RebalanceSpec, StrategySpec};
use tradecore::domain::risk::RiskParameters;
use tradecore::infrastructure::driver::ExchangeDriver;
use tradecore::infrastructure::mock::MockExchangeDriver;

pub const EXCHANGE: &str = "mock";

pub fn demo_script(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

pub fn strategy_spec(
    symbol: &str,
    name: &str,
    script: &str,
    overrides: HashMap<String, ConfigValue>,
) -> StrategySpec {
    StrategySpec {
        exchange: EXCHANGE.to_string(),
        symbol: symbol.to_string(),
        name: name.to_string(),
        script_path: demo_script(script),
        overrides,
    }
}

pub struct TestSystem {
    pub handle: SystemHandle,
    pub driver: Arc<MockExchangeDriver>,
}

pub async fn start_system(
    strategies: Vec<StrategySpec>,
    rebalance: Option<RebalanceSpec>,
    risk: RiskParameters,
    driver: Arc<MockExchangeDriver>,
) -> TestSystem {
    let config = Config {
        // No persistence in the integration harness; the repository layer
        // has its own suite.
        database_url: String::new(),
        strategies,
        rebalance,
        risk,
        ..Config::default()
    };

    let mut drivers: HashMap<String, Arc<dyn ExchangeDriver>> = HashMap::new();
    drivers.insert(EXCHANGE.to_string(), driver.clone());

    let app = Application::build_with_drivers(config, drivers)
        .await
        .expect("application builds");
    let handle = app.start().await.expect("system starts");

    // The exchange worker connects and subscribes asynchronously; block
    // until the driver sees its sinks so published events are not lost.
    let subscribed = wait_for(Duration::from_secs(5), || {
        let driver = driver.clone();
        async move { driver.has_subscribers().await }
    })
    .await;
    assert!(subscribed, "exchange worker should subscribe on startup");

    TestSystem { handle, driver }
}

/// Polls `check` until it returns true or the timeout lapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
