//! Composition root: builds the database and drivers, spawns the worker
//! tree under one supervisor, wires the address directory, and hands back a
//! control handle.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::events::TradingEvent;
use crate::application::exchange_worker::{ExchangeMsg, ExchangeWorker, StrategyRoute};
use crate::application::order_manager::{OrderManagerWorker, OrderMsg};
use crate::application::portfolio_worker::{PortfolioMsg, PortfolioWorker, Repositories};
use crate::application::rebalance::{RebalanceMsg, RebalanceWorker};
use crate::application::risk_manager::{RiskManagerWorker, RiskMsg};
use crate::application::strategy_worker::{StrategyMsg, StrategyWorker};
use crate::config::{Config, StrategySpec};
use crate::infrastructure::driver::ExchangeDriver;
use crate::infrastructure::mock::MockExchangeDriver;
use crate::infrastructure::persistence::{
    Database, SqliteOrderRepository, SqlitePnlRepository, SqlitePositionRepository,
    SqliteSettingsRepository, SqliteTradeRepository,
};
use crate::runtime::{timer, Address, Supervisor, CONTROL_CAPACITY, DATA_CAPACITY};
use crate::scripting::ScriptHost;

const ROLL_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// A strategy spec joined with its loaded script source and the interval
/// its validated settings resolved to.
struct PreparedStrategy {
    spec: StrategySpec,
    source: String,
    interval: crate::domain::market::Interval,
}

pub struct Application {
    pub config: Config,
    drivers: HashMap<String, Arc<dyn ExchangeDriver>>,
    database: Option<Database>,
}

pub struct SystemHandle {
    pub supervisor: Supervisor,
    pub portfolio: Address<PortfolioMsg>,
    pub risk: Address<RiskMsg>,
    pub order_manager: Address<OrderMsg>,
    pub exchanges: HashMap<String, Address<ExchangeMsg>>,
    pub strategies: Vec<Address<StrategyMsg>>,
    pub rebalance: Option<Address<RebalanceMsg>>,
    events: broadcast::Sender<TradingEvent>,
    timers: Vec<JoinHandle<()>>,
}

impl SystemHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<TradingEvent> {
        self.events.subscribe()
    }

    /// Orderly shutdown: strategies first, then rebalance, order manager,
    /// portfolio (final persist), and the exchange workers (disconnect)
    /// last. Each mailbox drains before its worker terminates.
    pub async fn shutdown(self) {
        info!("Shutting down trading system");
        for timer in &self.timers {
            timer.abort();
        }
        self.supervisor.shutdown().await;
        info!("Shutdown complete");
    }
}

impl Application {
    /// Builds against mock drivers (paper mode) for every enabled exchange.
    pub async fn build(config: Config) -> Result<Self> {
        let mut drivers: HashMap<String, Arc<dyn ExchangeDriver>> = HashMap::new();
        for exchange in config.exchanges.iter().filter(|e| e.enabled) {
            drivers.insert(
                exchange.name.clone(),
                Arc::new(MockExchangeDriver::new(&exchange.name).with_fee_rate(config.fee_rate)),
            );
        }
        Self::build_with_drivers(config, drivers).await
    }

    /// Builds against injected drivers (live mode; the wire adapters come
    /// from outside this crate).
    pub async fn build_with_drivers(
        config: Config,
        drivers: HashMap<String, Arc<dyn ExchangeDriver>>,
    ) -> Result<Self> {
        info!("Building trading application...");
        let database = if config.database_url.is_empty() {
            None
        } else {
            Some(
                Database::new(&config.database_url)
                    .await
                    .context("Failed to initialize database")?,
            )
        };
        Ok(Self {
            config,
            drivers,
            database,
        })
    }

    pub async fn start(self) -> Result<SystemHandle> {
        info!("Starting workers...");
        let Application {
            config,
            drivers,
            database,
        } = self;

        let repos = database.as_ref().map(|db| Repositories {
            orders: Arc::new(SqliteOrderRepository::new(db.pool.clone())),
            trades: Arc::new(SqliteTradeRepository::new(db.pool.clone())),
            positions: Arc::new(SqlitePositionRepository::new(db.pool.clone())),
            pnl: Arc::new(SqlitePnlRepository::new(db.pool.clone())),
        });

        let (events, _) = broadcast::channel(256);
        let mut supervisor = Supervisor::new();

        // Addresses exist before their workers so the directory can be
        // wired without capturing raw channels.
        let portfolio: Address<PortfolioMsg> = Address::unbound("portfolio");
        let risk: Address<RiskMsg> = Address::unbound("risk-manager");
        let order_manager: Address<OrderMsg> = Address::unbound("order-manager");
        let exchange_addresses: HashMap<String, Address<ExchangeMsg>> = drivers
            .keys()
            .map(|name| (name.clone(), Address::unbound(&format!("exchange-{name}"))))
            .collect();

        // Load and validate strategy scripts up front. A failed validation
        // is fatal for that strategy only: the worker is never created.
        let mut prepared: Vec<PreparedStrategy> = Vec::new();
        for spec in &config.strategies {
            if !drivers.contains_key(&spec.exchange) {
                error!(
                    strategy = %spec.name,
                    exchange = %spec.exchange,
                    "Strategy references an unknown exchange, skipping"
                );
                continue;
            }
            let source = match std::fs::read_to_string(&spec.script_path) {
                Ok(source) => source,
                Err(e) => {
                    error!(
                        strategy = %spec.name,
                        path = %spec.script_path.display(),
                        "Strategy script not readable, skipping: {e}"
                    );
                    continue;
                }
            };
            match ScriptHost::load(&spec.name, &source, &spec.overrides, config.callback_budget) {
                Ok(host) => prepared.push(PreparedStrategy {
                    spec: spec.clone(),
                    source,
                    interval: host.interval(),
                }),
                Err(e) => {
                    error!(strategy = %spec.name, "Strategy rejected at load: {e}");
                }
            }
        }

        // Spawn order: exchanges, portfolio, risk, order manager,
        // rebalance, strategies. Shutdown happens in reverse.
        let mut strategy_addresses: Vec<Address<StrategyMsg>> = Vec::new();
        let mut routes_by_exchange: HashMap<String, Vec<StrategyRoute>> = HashMap::new();
        let mut strategy_spawns: Vec<(PreparedStrategy, Address<StrategyMsg>)> = Vec::new();
        for strategy in prepared {
            let address: Address<StrategyMsg> = Address::unbound(&format!(
                "strategy-{}-{}-{}",
                strategy.spec.exchange, strategy.spec.symbol, strategy.spec.name
            ));
            routes_by_exchange
                .entry(strategy.spec.exchange.clone())
                .or_default()
                .push(StrategyRoute {
                    symbol: strategy.spec.symbol.clone(),
                    interval: strategy.interval,
                    address: address.clone(),
                });
            strategy_addresses.push(address.clone());
            strategy_spawns.push((strategy, address));
        }

        for (name, driver) in &drivers {
            let address = exchange_addresses[name].clone();
            let recipe_name = name.clone();
            let recipe_driver = driver.clone();
            let recipe_routes = routes_by_exchange.get(name).cloned().unwrap_or_default();
            let recipe_order_manager = order_manager.clone();
            let recipe_portfolio = portfolio.clone();
            let recipe_address = address.clone();
            supervisor
                .supervise(address.clone(), DATA_CAPACITY, move || {
                    ExchangeWorker::new(
                        &recipe_name,
                        recipe_driver.clone(),
                        recipe_routes.clone(),
                        recipe_order_manager.clone(),
                        recipe_portfolio.clone(),
                        recipe_address.clone(),
                    )
                })
                .await;
        }

        {
            let exchange_names: Vec<String> = drivers.keys().cloned().collect();
            let recipe_exchanges = exchange_addresses.clone();
            let recipe_order_manager = order_manager.clone();
            let recipe_repos = repos;
            supervisor
                .supervise(portfolio.clone(), DATA_CAPACITY, move || {
                    PortfolioWorker::new(
                        &exchange_names,
                        recipe_exchanges.clone(),
                        recipe_order_manager.clone(),
                        recipe_repos.as_ref().map(Repositories::clone),
                    )
                })
                .await;
        }

        {
            let params = config.risk.clone();
            let settings_repo = database
                .as_ref()
                .map(|db| Arc::new(SqliteSettingsRepository::new(db.pool.clone())));
            supervisor
                .supervise(risk.clone(), CONTROL_CAPACITY, move || {
                    let worker = RiskManagerWorker::new(params.clone());
                    match &settings_repo {
                        Some(repo) => worker.with_settings(repo.clone()),
                        None => worker,
                    }
                })
                .await;
        }

        {
            let recipe_risk = risk.clone();
            let recipe_portfolio = portfolio.clone();
            let recipe_exchanges = exchange_addresses.clone();
            let recipe_events = events.clone();
            supervisor
                .supervise(order_manager.clone(), DATA_CAPACITY, move || {
                    OrderManagerWorker::new(
                        recipe_risk.clone(),
                        recipe_portfolio.clone(),
                        recipe_exchanges.clone(),
                        recipe_events.clone(),
                    )
                })
                .await;
        }

        let rebalance_address = match &config.rebalance {
            Some(spec) if drivers.contains_key(&spec.exchange) => {
                match std::fs::read_to_string(&spec.script_path) {
                    Ok(source) => {
                        let address: Address<RebalanceMsg> = Address::unbound("rebalance");
                        let recipe_exchange = spec.exchange.clone();
                        let recipe_overrides = spec.overrides.clone();
                        let recipe_budget = config.callback_budget;
                        let recipe_portfolio = portfolio.clone();
                        let recipe_order_manager = order_manager.clone();
                        let recipe_risk = risk.clone();
                        let recipe_address = address.clone();
                        let recipe_events = events.clone();
                        supervisor
                            .supervise(address.clone(), CONTROL_CAPACITY, move || {
                                RebalanceWorker::new(
                                    &recipe_exchange,
                                    source.clone(),
                                    recipe_overrides.clone(),
                                    recipe_budget,
                                    recipe_portfolio.clone(),
                                    recipe_order_manager.clone(),
                                    recipe_risk.clone(),
                                    recipe_address.clone(),
                                    recipe_events.clone(),
                                )
                            })
                            .await;
                        Some(address)
                    }
                    Err(e) => {
                        error!("Rebalance script not readable, skipping: {e}");
                        None
                    }
                }
            }
            Some(spec) => {
                error!(exchange = %spec.exchange, "Rebalance references an unknown exchange");
                None
            }
            None => None,
        };

        for (strategy, address) in strategy_spawns {
            let recipe_order_manager = order_manager.clone();
            let recipe_budget = config.callback_budget;
            supervisor
                .supervise(address, DATA_CAPACITY, move || {
                    StrategyWorker::new(
                        &strategy.spec.exchange,
                        &strategy.spec.symbol,
                        &strategy.spec.name,
                        strategy.source.clone(),
                        strategy.spec.overrides.clone(),
                        recipe_budget,
                        recipe_order_manager.clone(),
                    )
                })
                .await;
        }

        // Periodic work arrives as mailbox messages, never as side-channel
        // mutation.
        let timers = vec![
            timer::every(portfolio.clone(), config.sync_interval, || {
                PortfolioMsg::SyncTick
            }),
            timer::every(portfolio.clone(), ROLL_CHECK_INTERVAL, || {
                PortfolioMsg::RollDay
            }),
            timer::every(risk.clone(), ROLL_CHECK_INTERVAL, || RiskMsg::RollDay),
        ];

        info!("Trading system running");
        Ok(SystemHandle {
            supervisor,
            portfolio,
            risk,
            order_manager,
            exchanges: exchange_addresses,
            strategies: strategy_addresses,
            rebalance: rebalance_address,
            events,
            timers,
        })
    }
}
