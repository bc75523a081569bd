// Shared fixtures for the integration tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use tradebot::config::{ExecutionConfig, TradingConfig};
use tradebot::db::SqliteStore;
use tradebot::exchange::PaperExchange;
use tradebot::execution::{OrderExecutor, PositionController};
use tradebot::risk::RiskLimits;
use tradebot::{AccountSnapshot, Candle, ExchangeError};

pub fn trading(trade_quantity: f64) -> TradingConfig {
    TradingConfig {
        trade_quantity,
        ..Default::default()
    }
}

/// Retries and confirmation without real waiting
pub fn fast_execution() -> ExecutionConfig {
    ExecutionConfig {
        max_attempts: 3,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
        confirm_attempts: 2,
        confirm_delay_ms: 0,
        order_timeout_secs: 60,
    }
}

pub fn timeout() -> ExchangeError {
    ExchangeError::Timeout("simulated timeout".to_string())
}

pub fn candle_time(index: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(15 * index)
}

/// 15-minute candles with the given closes
pub fn candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open_time = candle_time(i as i64);
            Candle {
                open_time,
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume: 25.0,
                close_time: open_time + Duration::minutes(15) - Duration::milliseconds(1),
            }
        })
        .collect()
}

pub async fn memory_store() -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::connect("sqlite::memory:", "BTCUSDT")
            .await
            .unwrap(),
    )
}

pub fn controller(
    exchange: &Arc<PaperExchange>,
    store: &Arc<SqliteStore>,
    trading: TradingConfig,
) -> PositionController {
    let executor = OrderExecutor::new(exchange.clone(), store.clone(), fast_execution());
    PositionController::new(trading, RiskLimits::default(), executor, store.clone())
}

/// What the scheduler would read at the start of a cycle
pub async fn snapshot(exchange: &PaperExchange) -> AccountSnapshot {
    let balances = exchange.balances().await;
    let price = tradebot::exchange::AccountMirror::last_price(exchange, "BTCUSDT")
        .await
        .unwrap();
    AccountSnapshot::new(balances, price)
}
