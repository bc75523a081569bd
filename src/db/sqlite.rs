use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;

use super::StateStore;
use crate::models::{Order, OrderStatus, Position, PositionState, Side, TradeRecord};
use crate::{BotError, Result};

/// SQLite persistence scoped to one symbol
pub struct SqliteStore {
    pool: SqlitePool,
    symbol: String,
}

impl SqliteStore {
    /// Connect (creating the file if needed) and run migrations
    ///
    /// # Arguments
    /// * `database_url` - e.g. `sqlite://tradebot.db` or `sqlite::memory:`
    /// * `symbol` - traded pair the rows belong to
    pub async fn connect(database_url: &str, symbol: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Single connection: the bot is one sequential writer, and an
        // in-memory database only lives as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to SQLite at {}", database_url);

        Ok(Self {
            pool,
            symbol: symbol.to_string(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

// ============== Row mapping ==============

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    let state: String = row.try_get("state")?;
    let position = Position {
        state: PositionState::parse(&state)
            .ok_or_else(|| BotError::Persistence(format!("unknown position state {}", state)))?,
        entry_price: row.try_get("entry_price")?,
        quantity: row.try_get("quantity")?,
        opened_at: row.try_get("opened_at")?,
    };
    position.validate()?;
    Ok(position)
}

fn side_from_row(row: &SqliteRow) -> Result<Side> {
    let side: String = row.try_get("side")?;
    Side::parse(&side).ok_or_else(|| BotError::Persistence(format!("unknown side {}", side)))
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord> {
    Ok(TradeRecord {
        id: Some(row.try_get("id")?),
        side: side_from_row(row)?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        timestamp: row.try_get("timestamp")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        client_order_id: row.try_get("client_order_id")?,
        symbol: row.try_get("symbol")?,
        side: side_from_row(row)?,
        requested_quantity: row.try_get("requested_quantity")?,
        requested_price: row.try_get("requested_price")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| BotError::Persistence(format!("unknown order status {}", status)))?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        fill_price: row.try_get("fill_price")?,
        filled_quantity: row.try_get("filled_quantity")?,
        fill_time: row.try_get("fill_time")?,
        trigger_time: row.try_get("trigger_time")?,
        error: row.try_get("error")?,
        submitted_at: row.try_get("created_at")?,
    })
}

// ============== Statements shared by single writes and commit_fill ==============

async fn insert_position(conn: &mut SqliteConnection, symbol: &str, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO position_snapshots (symbol, state, entry_price, quantity, opened_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(symbol)
    .bind(position.state.as_str())
    .bind(position.entry_price)
    .bind(position.quantity)
    .bind(position.opened_at)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_trade(conn: &mut SqliteConnection, symbol: &str, trade: &TradeRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO trade_history (symbol, side, quantity, price, timestamp, exchange_order_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(symbol)
    .bind(trade.side.as_str())
    .bind(trade.quantity)
    .bind(trade.price)
    .bind(trade.timestamp)
    .bind(trade.exchange_order_id)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn upsert_order(conn: &mut SqliteConnection, order: &Order) -> Result<()> {
    let now: DateTime<Utc> = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO orders (
            client_order_id, symbol, side, requested_quantity, requested_price,
            status, exchange_order_id, fill_price, filled_quantity, fill_time,
            trigger_time, error, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (client_order_id) DO UPDATE SET
            status = excluded.status,
            exchange_order_id = excluded.exchange_order_id,
            fill_price = excluded.fill_price,
            filled_quantity = excluded.filled_quantity,
            fill_time = excluded.fill_time,
            error = excluded.error,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&order.client_order_id)
    .bind(&order.symbol)
    .bind(order.side.as_str())
    .bind(order.requested_quantity)
    .bind(order.requested_price)
    .bind(order.status.as_str())
    .bind(order.exchange_order_id)
    .bind(order.fill_price)
    .bind(order.filled_quantity)
    .bind(order.fill_time)
    .bind(order.trigger_time)
    .bind(&order.error)
    .bind(order.submitted_at)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_latest_position(&self) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT state, entry_price, quantity, opened_at
            FROM position_snapshots
            WHERE symbol = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(&self.symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        position.validate()?;
        let mut conn = self.pool.acquire().await?;
        insert_position(&mut conn, &self.symbol, position).await?;

        tracing::debug!(state = position.state.as_str(), "Saved position snapshot");
        Ok(())
    }

    async fn append_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_trade(&mut conn, &self.symbol, trade).await
    }

    async fn list_trades(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, side, quantity, price, timestamp, exchange_order_id
            FROM trade_history
            WHERE symbol = ?
            ORDER BY id ASC
            "#,
        )
        .bind(&self.symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn last_trade_id(&self) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT MAX(id) FROM trade_history WHERE symbol = ?")
                .bind(&self.symbol)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    async fn record_order(&self, order: &Order) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_order(&mut conn, order).await
    }

    async fn find_order(&self, client_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = ?")
            .bind(client_order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn unresolved_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE symbol = ? AND status = 'SUBMITTED'
            ORDER BY created_at ASC
            "#,
        )
        .bind(&self.symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn commit_fill(
        &self,
        order: &Order,
        trade: &TradeRecord,
        position: &Position,
    ) -> Result<i64> {
        position.validate()?;

        let mut tx = self.pool.begin().await?;
        upsert_order(&mut tx, order).await?;
        let trade_id = insert_trade(&mut tx, &self.symbol, trade).await?;
        insert_position(&mut tx, &self.symbol, position).await?;
        tx.commit().await?;

        tracing::debug!(
            trade_id,
            order = %order.client_order_id,
            state = position.state.as_str(),
            "Committed fill"
        );
        Ok(trade_id)
    }
}
