//! Error taxonomy for the trading bot.
//!
//! Signal engine and account reads surface typed failures without side
//! effects; only the scheduler turns an error into continue/halt/exit.

use thiserror::Error;

/// Failures talking to the exchange, classified for retry decisions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited ({status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("request rejected (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// Timeouts, 5xx, throttling and connection resets may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout(_)
                | ExchangeError::Connection(_)
                | ExchangeError::Server { .. }
                | ExchangeError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ExchangeError::Connection(err.to_string())
        } else if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                ExchangeError::Server {
                    status: status.as_u16(),
                    message: err.to_string(),
                }
            } else {
                ExchangeError::Rejected {
                    code: i64::from(status.as_u16()),
                    message: err.to_string(),
                }
            }
        } else {
            ExchangeError::Connection(err.to_string())
        }
    }
}

/// Top-level bot error.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("invalid candle series: {0}")]
    InvalidCandles(String),

    #[error("account unavailable: {0}")]
    AccountUnavailable(String),

    #[error("insufficient balance: {available:.2} {asset} available, {required:.2} required")]
    InsufficientBalance {
        asset: String,
        required: f64,
        available: f64,
    },

    #[error("order submission failed: {0}")]
    OrderSubmissionFailed(String),

    #[error("position drift: {0}")]
    PositionDrift(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BotError {
    /// Errors that stop the process instead of skipping a cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BotError::PositionDrift(_)
                | BotError::AuthenticationFailed(_)
                | BotError::InsufficientBalance { .. }
                | BotError::Exchange(ExchangeError::Authentication(_))
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            BotError::InsufficientBalance { .. } => 2,
            BotError::PositionDrift(_) => 3,
            BotError::AuthenticationFailed(_)
            | BotError::Exchange(ExchangeError::Authentication(_)) => 4,
            _ => 1,
        }
    }

    /// Map an exchange failure on a read path (balances, ticker, candles)
    pub fn from_read(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Authentication(msg) => BotError::AuthenticationFailed(msg),
            other => BotError::AccountUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for BotError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BotError::Persistence(format!("migration failed: {}", err))
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}
