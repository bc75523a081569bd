use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    AccountMirror, CandleSource, ExchangeOrderStatus, FillDetail, NewOrder, OrderGateway,
    OrderReport,
};
use crate::error::ExchangeError;
use crate::models::{Balances, Candle, Side};

/// How the simulated book answers a new order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Filled in the placement response
    #[default]
    Immediate,
    /// Acknowledged as NEW, filled when first queried
    OnQuery,
    /// Acknowledged as NEW and left on the book until cancelled
    Resting,
}

#[derive(Debug)]
struct PaperOrder {
    report: OrderReport,
    quantity: f64,
    price: Option<f64>,
}

#[derive(Debug, Default)]
struct PaperState {
    quote_balance: f64,
    base_balance: f64,
    price: f64,
    candles: Vec<Candle>,
    orders: HashMap<String, PaperOrder>,
    next_order_id: i64,
    fill_mode: FillMode,
    place_failures: VecDeque<ExchangeError>,
    query_failures: VecDeque<ExchangeError>,
    read_failures: VecDeque<ExchangeError>,
    lost_acks: u32,
    place_calls: u32,
}

/// Simulated spot account for dry runs and tests.
///
/// Market orders fill at the current price, limit orders at their limit
/// price, with no commission. Failures can be scripted per call kind.
pub struct PaperExchange {
    base_asset: String,
    quote_asset: String,
    state: Mutex<PaperState>,
    price_feed: Option<Arc<dyn AccountMirror>>,
}

impl PaperExchange {
    pub fn new(base_asset: &str, quote_asset: &str, quote_balance: f64, base_balance: f64) -> Self {
        Self {
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            state: Mutex::new(PaperState {
                quote_balance,
                base_balance,
                next_order_id: 1,
                ..Default::default()
            }),
            price_feed: None,
        }
    }

    /// Take last prices from a live market instead of `set_price`
    pub fn with_price_feed(mut self, feed: Arc<dyn AccountMirror>) -> Self {
        self.price_feed = Some(feed);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.state.get_mut().price = price;
        self
    }

    pub fn with_candles(mut self, candles: Vec<Candle>) -> Self {
        let state = self.state.get_mut();
        if let Some(last) = candles.last() {
            state.price = last.close;
        }
        state.candles = candles;
        self
    }

    pub fn with_fill_mode(mut self, mode: FillMode) -> Self {
        self.state.get_mut().fill_mode = mode;
        self
    }

    pub async fn set_fill_mode(&self, mode: FillMode) {
        self.state.lock().await.fill_mode = mode;
    }

    pub async fn set_price(&self, price: f64) {
        self.state.lock().await.price = price;
    }

    pub async fn set_balances(&self, quote_balance: f64, base_balance: f64) {
        let mut state = self.state.lock().await;
        state.quote_balance = quote_balance;
        state.base_balance = base_balance;
    }

    pub async fn balances(&self) -> Balances {
        let state = self.state.lock().await;
        Balances {
            quote_balance: state.quote_balance,
            base_balance: state.base_balance,
        }
    }

    /// Append a candle and move the price to its close
    pub async fn push_candle(&self, candle: Candle) {
        let mut state = self.state.lock().await;
        state.price = candle.close;
        state.candles.push(candle);
    }

    /// The next placements fail with these errors, in order, without executing
    pub async fn fail_next_orders(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().await.place_failures.extend(errors);
    }

    pub async fn fail_next_queries(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().await.query_failures.extend(errors);
    }

    /// The next balance/price reads fail with these errors
    pub async fn fail_next_reads(&self, errors: impl IntoIterator<Item = ExchangeError>) {
        self.state.lock().await.read_failures.extend(errors);
    }

    /// Execute the next placement but answer it with a timeout
    pub async fn lose_next_acknowledgement(&self) {
        self.state.lock().await.lost_acks += 1;
    }

    /// Trade `quantity` against the newest resting order at its price
    pub async fn execute_resting(&self, quantity: f64) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().await;
        let Some((key, side, price)) = state
            .orders
            .iter()
            .filter(|(_, o)| !o.report.status.is_terminal())
            .max_by_key(|(_, o)| o.report.exchange_order_id)
            .map(|(key, o)| (key.clone(), o.report.side, o.price.unwrap_or(state.price)))
        else {
            return Ok(());
        };

        state.settle(side, quantity, price)?;
        if let Some(open) = state.orders.get_mut(&key) {
            let report = &mut open.report;
            report.executed_quantity += quantity;
            report.cumulative_quote_quantity += quantity * price;
            report.status = if report.executed_quantity + 1e-12 >= open.quantity {
                ExchangeOrderStatus::Filled
            } else {
                ExchangeOrderStatus::PartiallyFilled
            };
            report.fills.push(FillDetail {
                price,
                quantity,
                commission: 0.0,
                commission_asset: self.quote_asset.clone(),
            });
        }
        Ok(())
    }

    pub async fn place_calls(&self) -> u32 {
        self.state.lock().await.place_calls
    }

    pub async fn orders(&self) -> Vec<OrderReport> {
        let mut orders: Vec<_> = self
            .state
            .lock()
            .await
            .orders
            .values()
            .map(|o| o.report.clone())
            .collect();
        orders.sort_by_key(|o| o.exchange_order_id);
        orders
    }
}

impl PaperState {
    /// Move balances for an execution; rejects what the account cannot cover
    fn settle(&mut self, side: Side, quantity: f64, price: f64) -> Result<(), ExchangeError> {
        let notional = quantity * price;
        match side {
            Side::Buy if self.quote_balance + 1e-9 < notional => Err(insufficient_balance()),
            Side::Sell if self.base_balance + 1e-12 < quantity => Err(insufficient_balance()),
            Side::Buy => {
                self.quote_balance -= notional;
                self.base_balance += quantity;
                Ok(())
            }
            Side::Sell => {
                self.base_balance -= quantity;
                self.quote_balance += notional;
                Ok(())
            }
        }
    }

    fn fill(&mut self, report: &mut OrderReport, quantity: f64, price: f64, quote_asset: &str) {
        report.status = ExchangeOrderStatus::Filled;
        report.executed_quantity = quantity;
        report.cumulative_quote_quantity = quantity * price;
        report.transact_time = Some(Utc::now());
        report.fills = vec![FillDetail {
            price,
            quantity,
            commission: 0.0,
            commission_asset: quote_asset.to_string(),
        }];
    }

    fn next_read_failure(&mut self) -> Result<(), ExchangeError> {
        match self.read_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn insufficient_balance() -> ExchangeError {
    ExchangeError::Rejected {
        code: -2010,
        message: "Account has insufficient balance for requested action.".to_string(),
    }
}

#[async_trait]
impl CandleSource for PaperExchange {
    async fn fetch_candles(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.lock().await;
        let start = state.candles.len().saturating_sub(limit as usize);
        Ok(state.candles[start..].to_vec())
    }
}

#[async_trait]
impl AccountMirror for PaperExchange {
    async fn current_balances(&self, base: &str, quote: &str) -> Result<Balances, ExchangeError> {
        let mut state = self.state.lock().await;
        state.next_read_failure()?;

        let known = |asset: &str| asset == self.base_asset || asset == self.quote_asset;
        Ok(Balances {
            quote_balance: if known(quote) { state.quote_balance } else { 0.0 },
            base_balance: if known(base) { state.base_balance } else { 0.0 },
        })
    }

    async fn last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.state.lock().await.next_read_failure()?;

        if let Some(feed) = &self.price_feed {
            let price = feed.last_price(symbol).await?;
            self.state.lock().await.price = price;
            return Ok(price);
        }

        Ok(self.state.lock().await.price)
    }
}

#[async_trait]
impl OrderGateway for PaperExchange {
    async fn place_order(&self, order: &NewOrder) -> Result<OrderReport, ExchangeError> {
        let mut state = self.state.lock().await;
        state.place_calls += 1;

        if let Some(err) = state.place_failures.pop_front() {
            return Err(err);
        }
        if state.orders.contains_key(&order.client_order_id) {
            return Err(ExchangeError::Rejected {
                code: -2010,
                message: "Duplicate order sent.".to_string(),
            });
        }

        let price = order.kind.limit_price().unwrap_or(state.price);
        if !(price > 0.0) {
            return Err(ExchangeError::Rejected {
                code: -1013,
                message: "No price available for symbol".to_string(),
            });
        }

        let exchange_order_id = state.next_order_id;
        state.next_order_id += 1;

        let mut report = OrderReport {
            exchange_order_id,
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: if order.kind.limit_price().is_some() {
                "LIMIT".to_string()
            } else {
                "MARKET".to_string()
            },
            status: ExchangeOrderStatus::New,
            executed_quantity: 0.0,
            cumulative_quote_quantity: 0.0,
            fills: Vec::new(),
            transact_time: Some(Utc::now()),
        };

        if state.fill_mode == FillMode::Immediate {
            state.settle(order.side, order.quantity, price)?;
            state.fill(&mut report, order.quantity, price, &self.quote_asset);
        }
        state.orders.insert(
            order.client_order_id.clone(),
            PaperOrder {
                report: report.clone(),
                quantity: order.quantity,
                price: order.kind.limit_price(),
            },
        );

        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            return Err(ExchangeError::Timeout(
                "acknowledgement lost after execution".to_string(),
            ));
        }

        Ok(report)
    }

    async fn query_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderReport>, ExchangeError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.query_failures.pop_front() {
            return Err(err);
        }

        let Some(pending) = state.orders.get(client_order_id) else {
            return Ok(None);
        };
        let mut report = pending.report.clone();

        if report.status == ExchangeOrderStatus::New && state.fill_mode != FillMode::Resting {
            let quantity = pending.quantity;
            let price = pending.price.unwrap_or(state.price);
            // a book that cannot cover the order expires it unfilled
            match state.settle(report.side, quantity, price) {
                Ok(()) => state.fill(&mut report, quantity, price, &self.quote_asset),
                Err(_) => report.status = ExchangeOrderStatus::Expired,
            }
            if let Some(stored) = state.orders.get_mut(client_order_id) {
                stored.report = report.clone();
            }
        }

        Ok(Some(report))
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<OrderReport>, ExchangeError> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(client_order_id) {
            Some(open) if !open.report.status.is_terminal() => {
                open.report.status = ExchangeOrderStatus::Canceled;
                open.report.transact_time = Some(Utc::now());
                Ok(Some(open.report.clone()))
            }
            _ => Ok(None),
        }
    }
}
