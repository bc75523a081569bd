//! Bot configuration.
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `TRADEBOT__SECTION__KEY` environment variables. `BINANCE_API_KEY` and
//! `BINANCE_API_SECRET` are honoured for the credentials.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::strategy::SignalEngine;
use crate::{BotError, Result};

pub const BINANCE_MAINNET_URL: &str = "https://api.binance.com";
pub const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub strategy: StrategyConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Overrides the mainnet/testnet URL when set
    pub base_url: Option<String>,
    pub testnet: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout_secs: u64,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            testnet: false,
            api_key: None,
            api_secret: None,
            timeout_secs: 10,
            recv_window_ms: 5000,
            requests_per_second: 10,
        }
    }
}

impl ExchangeConfig {
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.testnet => BINANCE_TESTNET_URL.to_string(),
            None => BINANCE_MAINNET_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub base_asset: String,
    pub quote_asset: String,
    /// Kline interval, e.g. "1m", "15m", "1h"
    pub interval: String,
    pub candle_limit: u32,
    /// Base-asset quantity bought on each entry
    pub trade_quantity: f64,
    /// Quote balance needed to open a position
    pub min_quote_balance: f64,
    /// Base balance below this counts as "holding nothing"
    pub dust_threshold: f64,
    pub order_type: OrderTypeConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            interval: "15m".to_string(),
            candle_limit: 500,
            trade_quantity: 0.00011,
            min_quote_balance: 10.0,
            dust_threshold: 0.00001,
            order_type: OrderTypeConfig::Market,
        }
    }
}

impl TradingConfig {
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base_asset, self.quote_asset)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderTypeConfig {
    Market,
    /// Limit order at the cycle's last price
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.03,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Submission attempts before an order is marked FAILED
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Follow-up queries for a fill after an unconfirmed acknowledgement
    pub confirm_attempts: u32,
    pub confirm_delay_ms: u64,
    /// An order still open after this long is cancelled
    pub order_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
            confirm_attempts: 5,
            confirm_delay_ms: 1000,
            order_timeout_secs: 300,
        }
    }
}

impl ExecutionConfig {
    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub ma_crossover: MaCrossoverConfig,
    pub rsi: RsiConfig,
    pub breakout: BreakoutConfig,
    pub sma_trend: SmaTrendConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 1.0,
            sell_threshold: -1.0,
            ma_crossover: MaCrossoverConfig::default(),
            rsi: RsiConfig::default(),
            breakout: BreakoutConfig::default(),
            sma_trend: SmaTrendConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaCrossoverConfig {
    pub enabled: bool,
    pub fast_period: usize,
    pub slow_period: usize,
    pub weight: f64,
}

impl Default for MaCrossoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_period: 7,
            slow_period: 40,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub enabled: bool,
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
    pub weight: f64,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    pub enabled: bool,
    pub window: usize,
    pub weight: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 10,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmaTrendConfig {
    pub enabled: bool,
    pub period: usize,
    pub weight: f64,
}

impl Default for SmaTrendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: 20,
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    /// Stop after this many cycles (None runs until interrupted)
    pub max_cycles: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://tradebot.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    /// Directory for the daily rolling log file; stdout only when None
    pub directory: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "tradebot=info".to_string(),
            directory: Some("logs".to_string()),
            json: false,
        }
    }
}

impl BotConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder().add_source(Config::try_from(&BotConfig::default())?);

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("tradebot").required(false)),
        };

        let mut config: BotConfig = builder
            .add_source(
                Environment::with_prefix("TRADEBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(key) = std::env::var("BINANCE_API_KEY") {
            config.exchange.api_key = Some(key);
        }
        if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
            config.exchange.api_secret = Some(secret);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot trade with
    pub fn validate(&self) -> Result<()> {
        let trading = &self.trading;
        if trading.base_asset.trim().is_empty() || trading.quote_asset.trim().is_empty() {
            return Err(BotError::Config("base_asset and quote_asset are required".to_string()));
        }
        if !(trading.trade_quantity > 0.0) {
            return Err(BotError::Config(format!(
                "trade_quantity must be positive, got {}",
                trading.trade_quantity
            )));
        }
        if trading.min_quote_balance < 0.0 || trading.dust_threshold < 0.0 {
            return Err(BotError::Config(
                "min_quote_balance and dust_threshold must not be negative".to_string(),
            ));
        }
        if trading.candle_limit == 0 || trading.candle_limit > 1000 {
            return Err(BotError::Config(format!(
                "candle_limit must be within 1..=1000, got {}",
                trading.candle_limit
            )));
        }

        for (name, pct) in [
            ("stop_loss_pct", self.risk.stop_loss_pct),
            ("take_profit_pct", self.risk.take_profit_pct),
        ] {
            if !(pct > 0.0 && pct < 1.0) {
                return Err(BotError::Config(format!(
                    "{} must be within (0, 1), got {}",
                    name, pct
                )));
            }
        }

        if self.execution.max_attempts == 0 {
            return Err(BotError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(BotError::Config("poll_interval_secs must be > 0".to_string()));
        }
        if self.strategy.sell_threshold >= self.strategy.buy_threshold {
            return Err(BotError::Config(format!(
                "sell_threshold ({}) must be below buy_threshold ({})",
                self.strategy.sell_threshold, self.strategy.buy_threshold
            )));
        }

        // every cycle would end in InsufficientData otherwise
        let required = SignalEngine::from_config(&self.strategy)?.min_candles_required();
        if (trading.candle_limit as usize) < required {
            return Err(BotError::Config(format!(
                "candle_limit {} is shorter than the {} candles the enabled strategies need",
                trading.candle_limit, required
            )));
        }

        Ok(())
    }
}
