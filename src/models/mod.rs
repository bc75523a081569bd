use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// OHLCV candlestick from the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

/// Order side, also used for trade records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(value: &str) -> Option<Side> {
        match value {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined trading decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

/// One strategy's contribution to a signal
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub strategy: String,
    pub value: i8,
    pub weight: f64,
}

/// Trading signal produced fresh every cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub decision: Decision,
    pub strength: f64,
    pub votes: Vec<Vote>,
}

impl Signal {
    pub fn hold() -> Self {
        Self {
            decision: Decision::Hold,
            strength: 0.0,
            votes: Vec::new(),
        }
    }

    pub fn of(decision: Decision) -> Self {
        Self {
            decision,
            strength: 0.0,
            votes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Long,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Flat => "FLAT",
            PositionState::Long => "LONG",
        }
    }

    pub fn parse(value: &str) -> Option<PositionState> {
        match value {
            "FLAT" => Some(PositionState::Flat),
            "LONG" => Some(PositionState::Long),
            _ => None,
        }
    }
}

/// Held position for the traded symbol.
///
/// FLAT carries no entry price and zero quantity; LONG carries a positive
/// entry price and quantity. Build through `flat` / `long` to keep that true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub state: PositionState,
    pub entry_price: Option<f64>,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(at: DateTime<Utc>) -> Self {
        Self {
            state: PositionState::Flat,
            entry_price: None,
            quantity: 0.0,
            opened_at: at,
        }
    }

    pub fn long(entry_price: f64, quantity: f64, opened_at: DateTime<Utc>) -> Result<Self, BotError> {
        if !(entry_price > 0.0) || !(quantity > 0.0) {
            return Err(BotError::InvalidPosition(format!(
                "LONG requires positive entry price and quantity (got {} x {})",
                entry_price, quantity
            )));
        }

        Ok(Self {
            state: PositionState::Long,
            entry_price: Some(entry_price),
            quantity,
            opened_at,
        })
    }

    pub fn is_long(&self) -> bool {
        self.state == PositionState::Long
    }

    /// Check the FLAT/LONG field invariant (used on rows loaded from storage)
    pub fn validate(&self) -> Result<(), BotError> {
        match self.state {
            PositionState::Flat if self.entry_price.is_none() && self.quantity == 0.0 => Ok(()),
            PositionState::Long
                if self.entry_price.is_some_and(|p| p > 0.0) && self.quantity > 0.0 =>
            {
                Ok(())
            }
            _ => Err(BotError::InvalidPosition(format!("{:?}", self))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Submitted,
    Filled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<OrderStatus> {
        match value {
            "SUBMITTED" => Some(OrderStatus::Submitted),
            "FILLED" => Some(OrderStatus::Filled),
            "FAILED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

/// Market or limit pricing for an order request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
}

impl OrderKind {
    pub fn limit_price(&self) -> Option<f64> {
        match self {
            OrderKind::Market => None,
            OrderKind::Limit { price } => Some(*price),
        }
    }
}

/// What the controller asks the executor to do
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Open time of the candle whose signal triggered this request
    pub trigger_time: DateTime<Utc>,
    /// Id of the last trade applied to the position, 0 before the first
    pub position_version: i64,
}

/// Order as tracked by the executor and journaled in the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub requested_quantity: f64,
    pub requested_price: Option<f64>,
    pub status: OrderStatus,
    pub exchange_order_id: Option<i64>,
    pub fill_price: Option<f64>,
    pub filled_quantity: Option<f64>,
    pub fill_time: Option<DateTime<Utc>>,
    pub trigger_time: DateTime<Utc>,
    pub error: Option<String>,
    /// When the order was first journaled
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    pub fn submitted(request: &OrderRequest, client_order_id: String) -> Self {
        Self {
            client_order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            requested_quantity: request.quantity,
            requested_price: request.kind.limit_price(),
            status: OrderStatus::Submitted,
            exchange_order_id: None,
            fill_price: None,
            filled_quantity: None,
            fill_time: None,
            trigger_time: request.trigger_time,
            error: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// Append-only record of a confirmed fill
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub exchange_order_id: Option<i64>,
}

impl TradeRecord {
    /// Build from a filled order; None if the order has no confirmed fill
    pub fn from_fill(order: &Order) -> Option<Self> {
        if !order.is_filled() {
            return None;
        }

        Some(Self {
            id: None,
            side: order.side,
            quantity: order.filled_quantity?,
            price: order.fill_price?,
            timestamp: order.fill_time?,
            exchange_order_id: order.exchange_order_id,
        })
    }
}

/// Free balances for the traded pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balances {
    pub quote_balance: f64,
    pub base_balance: f64,
}

/// One-cycle view of the account, never persisted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountSnapshot {
    pub quote_balance: f64,
    pub base_balance: f64,
    pub last_price: f64,
    pub taken_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn new(balances: Balances, last_price: f64) -> Self {
        Self {
            quote_balance: balances.quote_balance,
            base_balance: balances.base_balance,
            last_price,
            taken_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_position_invariant() {
        let position = Position::flat(Utc::now());
        assert_eq!(position.state, PositionState::Flat);
        assert!(position.entry_price.is_none());
        assert_eq!(position.quantity, 0.0);
        assert!(position.validate().is_ok());
    }

    #[test]
    fn test_long_position_requires_positive_values() {
        assert!(Position::long(50000.0, 0.001, Utc::now()).is_ok());
        assert!(Position::long(0.0, 0.001, Utc::now()).is_err());
        assert!(Position::long(50000.0, 0.0, Utc::now()).is_err());
        assert!(Position::long(f64::NAN, 1.0, Utc::now()).is_err());
    }

    #[test]
    fn test_validate_rejects_mixed_state() {
        let broken = Position {
            state: PositionState::Flat,
            entry_price: Some(100.0),
            quantity: 0.0,
            opened_at: Utc::now(),
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_trade_record_requires_fill() {
        let request = OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            quantity: 0.001,
            kind: OrderKind::Market,
            trigger_time: Utc::now(),
            position_version: 0,
        };
        let mut order = Order::submitted(&request, "key".to_string());
        assert!(TradeRecord::from_fill(&order).is_none());

        order.status = OrderStatus::Filled;
        order.fill_price = Some(50000.0);
        order.filled_quantity = Some(0.001);
        order.fill_time = Some(Utc::now());

        let record = TradeRecord::from_fill(&order).unwrap();
        assert_eq!(record.side, Side::Buy);
        assert_eq!(record.price, 50000.0);
        assert_eq!(record.quantity, 0.001);
    }
}
