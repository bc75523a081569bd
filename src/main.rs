use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tradebot::backtest::BacktestRunner;
use tradebot::config::LoggingConfig;
use tradebot::db::{SqliteStore, StateStore};
use tradebot::exchange::{AccountMirror, BinanceClient, CandleSource, OrderGateway, PaperExchange};
use tradebot::execution::{drift_reason, OrderExecutor, PositionController};
use tradebot::risk::RiskLimits;
use tradebot::scheduler::{Scheduler, SchedulerSettings};
use tradebot::strategy::SignalEngine;
use tradebot::{BotConfig, BotError};

#[derive(Parser)]
#[command(name = "tradebot")]
#[command(about = "Single-symbol Binance spot trading bot")]
struct Cli {
    /// Configuration file (defaults to ./tradebot.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop (default)
    Run {
        /// Simulate balances and fills locally, using live prices
        #[arg(long)]
        paper: bool,
        /// Quote balance the paper account starts with
        #[arg(long, default_value = "1000")]
        paper_balance: f64,
        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Replay recent candles through the strategy
    Backtest {
        /// Number of candles to fetch (max 1000)
        #[arg(short, long, default_value = "1000")]
        limit: u32,
        #[arg(long, default_value = "1000")]
        initial_balance: f64,
    },
    /// Print the recorded trade history
    Trades,
    /// Show the stored position next to the live balances
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BotConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let _guard = setup_logging(&config.logging, cli.json || config.logging.json);

    let command = cli.command.unwrap_or(Commands::Run {
        paper: false,
        paper_balance: 1000.0,
        max_cycles: None,
    });

    let result = match command {
        Commands::Run {
            paper,
            paper_balance,
            max_cycles,
        } => run_bot(config, paper, paper_balance, max_cycles).await,
        Commands::Backtest {
            limit,
            initial_balance,
        } => run_backtest(config, limit, initial_balance).await,
        Commands::Trades => print_trades(config).await,
        Commands::Status => print_status(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "❌ Exiting");
            let code = e.downcast_ref::<BotError>().map_or(1, BotError::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Stdout plus an optional daily rolling file; keep the guard alive so the
/// file writer flushes on exit.
fn setup_logging(config: &LoggingConfig, json: bool) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let mut guard = None;
    let file_layer = config.directory.as_deref().and_then(|dir| {
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("tradebot")
            .filename_suffix("log")
            .build(dir)
        {
            Ok(appender) => {
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(fmt::layer().with_ansi(false).with_writer(writer))
            }
            Err(e) => {
                eprintln!("⚠️  File logging disabled ({}): {}", dir, e);
                None
            }
        }
    });

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer())
            .init();
    }

    guard
}

async fn run_bot(
    config: BotConfig,
    paper: bool,
    paper_balance: f64,
    max_cycles: Option<u64>,
) -> anyhow::Result<()> {
    let symbol = config.trading.symbol();
    tracing::info!(
        symbol = %symbol,
        interval = %config.trading.interval,
        paper,
        testnet = config.exchange.testnet,
        "🚀 tradebot starting"
    );

    let binance = Arc::new(BinanceClient::new(&config.exchange)?);
    binance.ping().await.map_err(BotError::from_read)?;
    tracing::info!(base_url = %config.exchange.resolved_base_url(), "✅ Exchange reachable");

    let lot_size = match binance.lot_size(&symbol).await {
        Ok(lot) => {
            tracing::info!(min_qty = %lot.min_qty, step_size = %lot.step_size, "Lot size loaded");
            Some(lot)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Lot size unavailable, quantities sent unrounded");
            None
        }
    };

    let store = Arc::new(SqliteStore::connect(&config.database.url, &symbol).await?);

    let (account, gateway): (Arc<dyn AccountMirror>, Arc<dyn OrderGateway>) = if paper {
        // a stored LONG is assumed to still be held
        let held = store
            .load_latest_position()
            .await?
            .filter(|p| p.is_long())
            .map_or(0.0, |p| p.quantity);
        let exchange = Arc::new(
            PaperExchange::new(
                &config.trading.base_asset,
                &config.trading.quote_asset,
                paper_balance,
                held,
            )
            .with_price_feed(binance.clone()),
        );
        tracing::info!(quote_balance = paper_balance, base_balance = held, "📝 Paper trading");
        (
            exchange.clone() as Arc<dyn AccountMirror>,
            exchange as Arc<dyn OrderGateway>,
        )
    } else {
        if !binance.has_credentials() {
            return Err(BotError::Config(
                "BINANCE_API_KEY and BINANCE_API_SECRET are required for live trading (or use --paper)"
                    .to_string(),
            )
            .into());
        }
        (
            binance.clone() as Arc<dyn AccountMirror>,
            binance.clone() as Arc<dyn OrderGateway>,
        )
    };

    let executor = OrderExecutor::new(gateway, store.clone(), config.execution.clone());
    let mut controller = PositionController::new(
        config.trading.clone(),
        RiskLimits::from(&config.risk),
        executor,
        store,
    );
    if let Some(lot) = lot_size {
        controller = controller.with_lot_size(lot);
    }

    let engine = SignalEngine::from_config(&config.strategy)?;
    tracing::info!(strategies = ?engine.strategy_names(), "Signal engine ready");

    let mut settings = SchedulerSettings::from(&config.scheduler);
    if max_cycles.is_some() {
        settings.max_cycles = max_cycles;
    }

    let candles: Arc<dyn CandleSource> = binance;
    let mut scheduler = Scheduler::new(
        config.trading.clone(),
        settings,
        candles,
        account,
        engine,
        controller,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Ctrl-C received, stopping after the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let reason = scheduler.run(shutdown_rx).await?;
    tracing::info!(?reason, "Stopped");
    Ok(())
}

async fn run_backtest(config: BotConfig, limit: u32, initial_balance: f64) -> anyhow::Result<()> {
    let symbol = config.trading.symbol();
    let binance = BinanceClient::new(&config.exchange)?;

    println!("📡 Fetching {} {} candles for {}...", limit, config.trading.interval, symbol);
    let candles = binance
        .fetch_candles(&symbol, &config.trading.interval, limit.min(1000))
        .await
        .map_err(BotError::from_read)?;

    if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
        println!(
            "✓ Loaded {} candles ({} to {})",
            candles.len(),
            first.open_time,
            last.open_time
        );
    }

    let engine = SignalEngine::from_config(&config.strategy)?;
    let runner = BacktestRunner::new(initial_balance, RiskLimits::from(&config.risk));
    let metrics = runner.run(&engine, &candles).context("backtest failed")?;

    metrics.print_report();
    Ok(())
}

async fn print_trades(config: BotConfig) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&config.database.url, &config.trading.symbol()).await?;
    let trades = store.list_trades().await?;

    if trades.is_empty() {
        println!("No trades recorded for {}", store.symbol());
        return Ok(());
    }

    println!(
        "{:<6} {:<25} {:<5} {:>14} {:>14} {:>14}",
        "ID", "TIME", "SIDE", "QUANTITY", "PRICE", "VALUE"
    );
    for trade in &trades {
        println!(
            "{:<6} {:<25} {:<5} {:>14.8} {:>14.2} {:>14.2}",
            trade.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            trade.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            trade.side.as_str(),
            trade.quantity,
            trade.price,
            trade.quantity * trade.price
        );
    }
    println!("{} trades", trades.len());
    Ok(())
}

async fn print_status(config: BotConfig) -> anyhow::Result<()> {
    let symbol = config.trading.symbol();
    let store = SqliteStore::connect(&config.database.url, &symbol).await?;

    let Some(position) = store.load_latest_position().await? else {
        println!("No stored position for {}", symbol);
        return Ok(());
    };

    println!("📊 {} position: {}", symbol, position.state.as_str());
    if let Some(entry) = position.entry_price {
        println!("  Entry Price:  {:.2}", entry);
        println!("  Quantity:     {:.8}", position.quantity);
        println!("  Opened At:    {}", position.opened_at);
    }

    let unresolved = store.unresolved_orders().await?;
    for order in &unresolved {
        println!(
            "  ⏳ Unconfirmed {} order {}",
            order.side, order.client_order_id
        );
    }

    let binance = BinanceClient::new(&config.exchange)?;
    if !binance.has_credentials() {
        println!("  (no API credentials, live balances skipped)");
        return Ok(());
    }

    let balances = binance
        .current_balances(&config.trading.base_asset, &config.trading.quote_asset)
        .await
        .map_err(BotError::from_read)?;
    println!(
        "  Balances:     {:.8} {} / {:.2} {}",
        balances.base_balance,
        config.trading.base_asset,
        balances.quote_balance,
        config.trading.quote_asset
    );

    match drift_reason(
        &position,
        &config.trading.base_asset,
        balances.base_balance,
        config.trading.dust_threshold,
    ) {
        Some(reason) => println!("  ⚠️  Drift: {}", reason),
        None => println!("  ✅ Position matches the exchange balance"),
    }
    Ok(())
}
