// Exchange access: market data, account reads and order placement
pub mod binance;
pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::models::{Balances, Candle, OrderKind, Side};

pub use binance::BinanceClient;
pub use paper::PaperExchange;

/// Ordered OHLCV history for a symbol
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Read-only view of the account and the ticker
#[async_trait]
pub trait AccountMirror: Send + Sync {
    /// Free balances; an asset missing from the account is a zero balance
    async fn current_balances(&self, base: &str, quote: &str) -> Result<Balances, ExchangeError>;

    async fn last_price(&self, symbol: &str) -> Result<f64, ExchangeError>;
}

/// Order placement and lookup by client order id
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, order: &NewOrder) -> Result<OrderReport, ExchangeError>;

    /// `Ok(None)` when the exchange has no order with this client id
    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderReport>, ExchangeError>;

    /// Cancel an open order. `Ok(None)` when no open order has this id,
    /// either because it never existed or because it already closed.
    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderReport>, ExchangeError>;
}

/// Order as sent to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub client_order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl ExchangeOrderStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" | "PENDING_NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" | "PENDING_CANCEL" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Some(Self::Expired),
            _ => None,
        }
    }

    /// The exchange will not change this order any further
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }
}

/// One execution against the book
#[derive(Debug, Clone, PartialEq)]
pub struct FillDetail {
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub commission_asset: String,
}

/// What the exchange says about an order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub exchange_order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub status: ExchangeOrderStatus,
    pub executed_quantity: f64,
    pub cumulative_quote_quantity: f64,
    pub fills: Vec<FillDetail>,
    pub transact_time: Option<DateTime<Utc>>,
}

impl OrderReport {
    /// Volume-weighted fill price, from fills or the cumulative quote amount
    pub fn average_fill_price(&self) -> Option<f64> {
        let filled: f64 = self.fills.iter().map(|f| f.quantity).sum();
        if filled > 0.0 {
            let notional: f64 = self.fills.iter().map(|f| f.price * f.quantity).sum();
            return Some(notional / filled);
        }

        if self.executed_quantity > 0.0 && self.cumulative_quote_quantity > 0.0 {
            return Some(self.cumulative_quote_quantity / self.executed_quantity);
        }

        None
    }

    /// A fill we can act on: terminal status, executed quantity and a price
    pub fn confirmed_fill(&self) -> Option<(f64, f64)> {
        if !self.status.is_terminal() || self.executed_quantity <= 0.0 {
            return None;
        }
        self.average_fill_price()
            .map(|price| (price, self.executed_quantity))
    }

    /// Terminal without anything executed
    pub fn is_dead(&self) -> bool {
        self.status.is_terminal() && self.executed_quantity <= 0.0
    }

    pub fn commission_asset(&self) -> Option<&str> {
        self.fills.first().map(|f| f.commission_asset.as_str())
    }
}

/// Quantity rules from the symbol's LOT_SIZE filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotSize {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
}

impl LotSize {
    /// Truncate down to the step size; None if the result is below `min_qty`
    pub fn normalize(&self, quantity: f64) -> Option<f64> {
        let qty = Decimal::from_f64(quantity)?;
        let mut truncated = if self.step_size > Decimal::ZERO {
            (qty / self.step_size).floor() * self.step_size
        } else {
            qty
        };

        if self.max_qty > Decimal::ZERO && truncated > self.max_qty {
            truncated = self.max_qty;
        }
        if truncated <= Decimal::ZERO || truncated < self.min_qty {
            return None;
        }

        truncated.normalize().to_f64()
    }
}

/// Plain decimal rendering for request parameters (never scientific notation)
pub fn format_decimal(value: f64) -> String {
    Decimal::from_f64(value)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn report(status: ExchangeOrderStatus, executed: f64, quote: f64) -> OrderReport {
        OrderReport {
            exchange_order_id: 1,
            client_order_id: "abc".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: "MARKET".to_string(),
            status,
            executed_quantity: executed,
            cumulative_quote_quantity: quote,
            fills: Vec::new(),
            transact_time: None,
        }
    }

    #[test]
    fn test_fill_price_from_fills() {
        let mut r = report(ExchangeOrderStatus::Filled, 0.002, 0.0);
        r.fills = vec![
            FillDetail {
                price: 100.0,
                quantity: 0.001,
                commission: 0.0,
                commission_asset: "BNB".to_string(),
            },
            FillDetail {
                price: 200.0,
                quantity: 0.001,
                commission: 0.0,
                commission_asset: "BNB".to_string(),
            },
        ];
        assert_eq!(r.average_fill_price(), Some(150.0));
        assert_eq!(r.confirmed_fill(), Some((150.0, 0.002)));
        assert_eq!(r.commission_asset(), Some("BNB"));
    }

    #[test]
    fn test_fill_price_from_cumulative_quote() {
        let r = report(ExchangeOrderStatus::Filled, 0.001, 50.0);
        assert_eq!(r.confirmed_fill(), Some((50000.0, 0.001)));
    }

    #[test]
    fn test_acknowledgement_is_not_a_fill() {
        let r = report(ExchangeOrderStatus::New, 0.0, 0.0);
        assert_eq!(r.confirmed_fill(), None);
        assert!(!r.is_dead());

        let r = report(ExchangeOrderStatus::PartiallyFilled, 0.0005, 25.0);
        assert_eq!(r.confirmed_fill(), None);

        let r = report(ExchangeOrderStatus::Expired, 0.0, 0.0);
        assert!(r.is_dead());
    }

    #[test]
    fn test_lot_size_truncates_to_step() {
        let lot = LotSize {
            min_qty: Decimal::from_str("0.00001").unwrap(),
            max_qty: Decimal::from_str("9000").unwrap(),
            step_size: Decimal::from_str("0.00001").unwrap(),
        };
        assert_eq!(lot.normalize(0.000119), Some(0.00011));
        assert_eq!(lot.normalize(0.000009), None);

        let coarse = LotSize {
            min_qty: Decimal::from_str("0.001").unwrap(),
            max_qty: Decimal::ZERO,
            step_size: Decimal::from_str("0.001").unwrap(),
        };
        assert_eq!(coarse.normalize(1.23456), Some(1.234));
    }

    #[test]
    fn test_format_decimal_avoids_exponent() {
        assert_eq!(format_decimal(0.00011), "0.00011");
        assert_eq!(format_decimal(50000.0), "50000");
    }
}
