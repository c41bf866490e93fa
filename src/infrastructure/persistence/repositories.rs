use crate::domain::repositories::{
    OrderRepository, PnlRepository, PositionRepository, SettingsRepository, TradeRepository,
};
use crate::domain::trading::portfolio::{PnlRecord, Position};
use crate::domain::trading::types::{Fill, Order, OrderSide, OrderStatus, OrderType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

fn parse_side(s: &str) -> OrderSide {
    match s {
        "SELL" => OrderSide::Sell,
        _ => OrderSide::Buy,
    }
}

fn parse_order_type(s: &str) -> OrderType {
    match s {
        "LIMIT" => OrderType::Limit,
        "STOP_MARKET" => OrderType::StopMarket,
        "STOP_LIMIT" => OrderType::StopLimit,
        "TRAILING_STOP" => OrderType::TrailingStop,
        "TAKE_PROFIT" => OrderType::TakeProfit,
        _ => OrderType::Market,
    }
}

fn parse_status(s: &str) -> OrderStatus {
    match s {
        "ARMED" => OrderStatus::Armed,
        "PENDING" => OrderStatus::Pending,
        "OPEN" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Cancelled,
        "STOPPED" => OrderStatus::Stopped,
        _ => OrderStatus::Rejected,
    }
}

fn decimal_column(row: &sqlx::sqlite::SqliteRow, name: &str) -> Result<Decimal> {
    let raw: String = row.try_get(name)?;
    Decimal::from_str(&raw).with_context(|| format!("Bad decimal in column {name}"))
}

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(&self, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Order>> {
        let mut orders = Vec::new();
        for row in rows {
            let side: String = row.try_get("side")?;
            let order_type: String = row.try_get("order_type")?;
            let status: String = row.try_get("status")?;
            orders.push(Order {
                client_id: row.try_get("client_id")?,
                exchange_id: row.try_get("exchange_id")?,
                exchange: row.try_get("exchange")?,
                symbol: row.try_get("symbol")?,
                side: parse_side(&side),
                order_type: parse_order_type(&order_type),
                quantity: decimal_column(&row, "quantity")?,
                filled_quantity: decimal_column(&row, "filled_quantity")?,
                price: row
                    .try_get::<Option<String>, _>("price")?
                    .and_then(|p| Decimal::from_str(&p).ok()),
                status: parse_status(&status),
                stop_price: None,
                trail_percent: None,
                take_profit_price: None,
                reason: row.try_get("reason")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(orders)
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (client_id, exchange_id, exchange, symbol, side, order_type,
                 quantity, filled_quantity, price, status, reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(client_id) DO UPDATE SET
                exchange_id = excluded.exchange_id,
                filled_quantity = excluded.filled_quantity,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&order.client_id)
        .bind(&order.exchange_id)
        .bind(&order.exchange)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.quantity.to_string())
        .bind(order.filled_quantity.to_string())
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.status.to_string())
        .bind(&order.reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save order")?;
        Ok(())
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM orders WHERE status = ? ORDER BY created_at DESC")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;
        self.map_rows(rows)
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM orders ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        self.map_rows(rows)
    }
}

pub struct SqliteTradeRepository {
    pool: SqlitePool,
}

impl SqliteTradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn record(&self, fill: &Fill) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (order_id, symbol, side, quantity, price, fee, ts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fill.order_id)
        .bind(&fill.symbol)
        .bind(fill.side.to_string())
        .bind(fill.quantity.to_string())
        .bind(fill.price.to_string())
        .bind(fill.fee.to_string())
        .bind(fill.ts)
        .execute(&self.pool)
        .await
        .context("Failed to record trade")?;
        Ok(())
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Vec<Fill>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE symbol = ? ORDER BY ts DESC")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        let mut fills = Vec::new();
        for row in rows {
            let side: String = row.try_get("side")?;
            fills.push(Fill {
                order_id: row.try_get("order_id")?,
                exchange: String::new(),
                symbol: row.try_get("symbol")?,
                side: parse_side(&side),
                quantity: decimal_column(&row, "quantity")?,
                price: decimal_column(&row, "price")?,
                fee: decimal_column(&row, "fee")?,
                ts: row.try_get("ts")?,
            });
        }
        Ok(fills)
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM trades")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }
}

pub struct SqlitePositionRepository {
    pool: SqlitePool,
}

impl SqlitePositionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn upsert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (exchange, symbol, quantity, avg_price, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(exchange, symbol) DO UPDATE SET
                quantity = excluded.quantity,
                avg_price = excluded.avg_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.exchange)
        .bind(&position.symbol)
        .bind(position.quantity.to_string())
        .bind(position.avg_price.to_string())
        .bind(position.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert position")?;
        Ok(())
    }

    async fn load_all(&self, exchange: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE exchange = ?")
            .bind(exchange)
            .fetch_all(&self.pool)
            .await?;
        let mut positions = Vec::new();
        for row in rows {
            positions.push(Position {
                exchange: row.try_get("exchange")?,
                symbol: row.try_get("symbol")?,
                quantity: decimal_column(&row, "quantity")?,
                avg_price: decimal_column(&row, "avg_price")?,
                current_price: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(positions)
    }
}

pub struct SqlitePnlRepository {
    pool: SqlitePool,
}

impl SqlitePnlRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PnlRepository for SqlitePnlRepository {
    async fn record(&self, exchange: &str, record: &PnlRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pnl_history (exchange, date, realized, unrealized_snapshot)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(exchange, date) DO UPDATE SET
                realized = excluded.realized,
                unrealized_snapshot = excluded.unrealized_snapshot
            "#,
        )
        .bind(exchange)
        .bind(record.date.to_string())
        .bind(record.realized.to_string())
        .bind(record.unrealized_snapshot.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to record pnl")?;
        Ok(())
    }

    async fn history(&self, exchange: &str, limit: usize) -> Result<Vec<PnlRecord>> {
        let rows =
            sqlx::query("SELECT * FROM pnl_history WHERE exchange = ? ORDER BY date DESC LIMIT ?")
                .bind(exchange)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        let mut records = Vec::new();
        for row in rows {
            let date: String = row.try_get("date")?;
            records.push(PnlRecord {
                date: NaiveDate::from_str(&date).context("Bad date in pnl_history")?,
                realized: decimal_column(&row, "realized")?,
                unrealized_snapshot: decimal_column(&row, "unrealized_snapshot")?,
            });
        }
        Ok(records)
    }
}

pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn put(&self, key: &str, value: &str, scope: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, scope, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(scope)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save setting")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("value")?),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    async fn db() -> Database {
        Database::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_order_save_and_update() {
        let db = db().await;
        let repo = SqliteOrderRepository::new(db.pool.clone());

        let mut order = Order::new(
            "mock",
            "BTC/USDT",
            OrderSide::Buy,
            OrderType::Limit,
            dec!(0.5),
            Some(dec!(45000)),
            "test".to_string(),
        );
        repo.save(&order).await.unwrap();

        order.status = OrderStatus::Filled;
        order.filled_quantity = dec!(0.5);
        repo.save(&order).await.unwrap();

        let filled = repo.find_by_status(OrderStatus::Filled).await.unwrap();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].client_id, order.client_id);
        assert_eq!(filled[0].filled_quantity, dec!(0.5));
        assert_eq!(filled[0].price, Some(dec!(45000)));

        assert!(repo.find_by_status(OrderStatus::Pending).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trade_round_trip() {
        let db = db().await;
        let repo = SqliteTradeRepository::new(db.pool.clone());

        let fill = Fill {
            order_id: "o1".to_string(),
            exchange: "mock".to_string(),
            symbol: "ETH/USDT".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(2),
            price: dec!(3000),
            fee: dec!(6),
            ts: 1_700_000_000_000,
        };
        repo.record(&fill).await.unwrap();

        let fills = repo.find_by_symbol("ETH/USDT").await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, dec!(2));
        assert_eq!(fills[0].fee, dec!(6));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_position_upsert() {
        let db = db().await;
        let repo = SqlitePositionRepository::new(db.pool.clone());

        let mut position = Position::new("mock", "BTC/USDT");
        position.quantity = dec!(1.5);
        position.avg_price = dec!(42000);
        repo.upsert(&position).await.unwrap();

        position.quantity = dec!(2);
        repo.upsert(&position).await.unwrap();

        let loaded = repo.load_all("mock").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].quantity, dec!(2));
        assert_eq!(loaded[0].avg_price, dec!(42000));
    }

    #[tokio::test]
    async fn test_pnl_history_round_trip() {
        let db = db().await;
        let repo = SqlitePnlRepository::new(db.pool.clone());

        let record = PnlRecord {
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            realized: dec!(120.5),
            unrealized_snapshot: dec!(-20),
        };
        repo.record("mock", &record).await.unwrap();
        repo.record("mock", &record).await.unwrap();

        let history = repo.history("mock", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].realized, dec!(120.5));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let db = db().await;
        let repo = SqliteSettingsRepository::new(db.pool.clone());

        repo.put("max_daily_trades", "50", "risk").await.unwrap();
        repo.put("max_daily_trades", "25", "risk").await.unwrap();
        assert_eq!(
            repo.get("max_daily_trades").await.unwrap(),
            Some("25".to_string())
        );
        assert_eq!(repo.get("missing").await.unwrap(), None);
    }
}
