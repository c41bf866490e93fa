use crate::domain::trading::portfolio::{PnlRecord, Position};
use crate::domain::trading::types::{Fill, Order, OrderStatus};
use anyhow::Result;
use async_trait::async_trait;

/// Persistence port for orders. Implemented over SQLite in
/// `infrastructure::persistence`; only the portfolio worker writes.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &Order) -> Result<()>;
    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
    async fn find_recent(&self, limit: usize) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn record(&self, fill: &Fill) -> Result<()>;
    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<Fill>>;
    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn upsert(&self, position: &Position) -> Result<()>;
    async fn load_all(&self, exchange: &str) -> Result<Vec<Position>>;
}

#[async_trait]
pub trait PnlRepository: Send + Sync {
    async fn record(&self, exchange: &str, record: &PnlRecord) -> Result<()>;
    async fn history(&self, exchange: &str, limit: usize) -> Result<Vec<PnlRecord>>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn put(&self, key: &str, value: &str, scope: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
}
