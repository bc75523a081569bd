mod common;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::{candles, controller, memory_store, timeout, trading};
use tradebot::db::{SqliteStore, StateStore};
use tradebot::exchange::PaperExchange;
use tradebot::execution::Phase;
use tradebot::scheduler::{Scheduler, SchedulerSettings, StopReason};
use tradebot::strategy::{SignalEngine, SmaTrendStrategy};
use tradebot::{BotError, Position, PositionState};

fn rising() -> Vec<f64> {
    (0..30).map(|i| 100.0 + i as f64).collect()
}

fn trend_engine() -> SignalEngine {
    SignalEngine::new(1.0, -1.0).with_strategy(Box::new(SmaTrendStrategy::new(5).unwrap()), 1.0)
}

fn scheduler(
    exchange: &Arc<PaperExchange>,
    store: &Arc<SqliteStore>,
    max_cycles: Option<u64>,
) -> Scheduler {
    let settings = SchedulerSettings {
        poll_interval: Duration::from_millis(5),
        max_cycles,
    };
    Scheduler::new(
        trading(1.0),
        settings,
        exchange.clone(),
        exchange.clone(),
        trend_engine(),
        controller(exchange, store, trading(1.0)),
    )
}

#[tokio::test]
async fn test_bounded_run_enters_once() {
    let _ = tracing_subscriber::fmt::try_init();

    let exchange = Arc::new(
        PaperExchange::new("BTC", "USDT", 1000.0, 0.0).with_candles(candles(&rising())),
    );
    let store = memory_store().await;
    let mut scheduler = scheduler(&exchange, &store, Some(3));

    let (_tx, rx) = watch::channel(false);
    let reason = scheduler.run(rx).await.unwrap();

    assert_eq!(reason, StopReason::MaxCycles);
    assert_eq!(scheduler.controller().phase(), Phase::Long);
    assert_eq!(exchange.place_calls().await, 1);

    let trades = store.list_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, 129.0);
}

#[tokio::test]
async fn test_insufficient_quote_balance_stops_with_code_2() {
    let exchange = Arc::new(
        PaperExchange::new("BTC", "USDT", 5.0, 0.0).with_candles(candles(&rising())),
    );
    let store = memory_store().await;
    let mut scheduler = scheduler(&exchange, &store, Some(5));

    let (_tx, rx) = watch::channel(false);
    let err = scheduler.run(rx).await.unwrap_err();

    assert!(matches!(err, BotError::InsufficientBalance { .. }));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(exchange.place_calls().await, 0);
}

#[tokio::test]
async fn test_drift_on_restart_is_fatal() {
    let exchange = Arc::new(
        PaperExchange::new("BTC", "USDT", 1000.0, 0.0).with_candles(candles(&rising())),
    );
    let store = memory_store().await;
    store
        .save_position(&Position::long(120.0, 1.0, Utc::now()).unwrap())
        .await
        .unwrap();
    let mut scheduler = scheduler(&exchange, &store, Some(5));

    let (_tx, rx) = watch::channel(false);
    let err = scheduler.run(rx).await.unwrap_err();

    assert!(matches!(err, BotError::PositionDrift(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(exchange.place_calls().await, 0);
}

#[tokio::test]
async fn test_transient_read_failure_skips_cycle() {
    let exchange = Arc::new(
        PaperExchange::new("BTC", "USDT", 1000.0, 0.0).with_candles(candles(&rising())),
    );
    let store = memory_store().await;
    let mut scheduler = scheduler(&exchange, &store, Some(1));

    scheduler.run_cycle().await.unwrap();
    exchange.fail_next_reads([timeout()]).await;
    let err = scheduler.run_cycle().await.unwrap_err();
    // skipped, not fatal
    assert!(matches!(err, BotError::AccountUnavailable(_)));
    assert!(!err.is_fatal());

    let (_tx, rx) = watch::channel(false);
    assert_eq!(scheduler.run(rx).await.unwrap(), StopReason::MaxCycles);
}

#[tokio::test]
async fn test_shutdown_between_cycles() {
    let exchange = Arc::new(
        PaperExchange::new("BTC", "USDT", 1000.0, 0.0).with_candles(candles(&rising())),
    );
    let store = memory_store().await;
    let mut scheduler = scheduler(&exchange, &store, None);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let reason = scheduler.run(rx).await.unwrap();

    assert_eq!(reason, StopReason::Interrupted);
    assert_eq!(exchange.place_calls().await, 0);
}

#[tokio::test]
async fn test_exit_on_falling_market() {
    let exchange = Arc::new(
        PaperExchange::new("BTC", "USDT", 1000.0, 0.0).with_candles(candles(&rising())),
    );
    let store = memory_store().await;
    let mut scheduler = scheduler(&exchange, &store, None);

    scheduler.run_cycle().await.unwrap();
    assert_eq!(scheduler.controller().phase(), Phase::Long);

    // a new candle closes well under the average and below the stop
    let mut next = candles(&[rising(), vec![120.0]].concat());
    exchange.push_candle(next.remove(30)).await;

    let transition = scheduler.run_cycle().await.unwrap();
    assert_eq!(transition.from, Phase::Long);
    assert_eq!(transition.to, Phase::Flat);
    assert_eq!(
        store.load_latest_position().await.unwrap().unwrap().state,
        PositionState::Flat
    );
    assert_eq!(store.list_trades().await.unwrap().len(), 2);
}
