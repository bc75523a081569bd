// Durable state: position snapshots, trade history and the order journal
pub mod sqlite;

use async_trait::async_trait;

use crate::models::{Order, Position, TradeRecord};
use crate::Result;

pub use sqlite::SqliteStore;

/// Storage for one traded symbol.
///
/// Every write is durable before the call returns.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_latest_position(&self) -> Result<Option<Position>>;

    async fn save_position(&self, position: &Position) -> Result<()>;

    /// Returns the new record's id
    async fn append_trade(&self, trade: &TradeRecord) -> Result<i64>;

    /// Oldest first
    async fn list_trades(&self) -> Result<Vec<TradeRecord>>;

    /// Id of the newest trade, None before the first
    async fn last_trade_id(&self) -> Result<Option<i64>>;

    /// Insert or update a journal entry by client order id
    async fn record_order(&self, order: &Order) -> Result<()>;

    async fn find_order(&self, client_order_id: &str) -> Result<Option<Order>>;

    /// Orders journaled as SUBMITTED, oldest first
    async fn unresolved_orders(&self) -> Result<Vec<Order>>;

    /// Filled order, its trade record and the resulting position in one write
    async fn commit_fill(
        &self,
        order: &Order,
        trade: &TradeRecord,
        position: &Position,
    ) -> Result<i64>;
}
