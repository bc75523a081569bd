use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// Why a LONG position is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    StrategySell, // Strategy-driven sell signal
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StrategySell => "strategy_sell",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price exits relative to the entry price, checked before any signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub stop_loss_pct: f64,   // fraction below entry, e.g. 0.02
    pub take_profit_pct: f64, // fraction above entry, e.g. 0.03
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.03,
        }
    }
}

impl From<&RiskConfig> for RiskLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        }
    }
}

impl RiskLimits {
    pub fn stop_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 - self.stop_loss_pct)
    }

    pub fn take_profit_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 + self.take_profit_pct)
    }

    /// Forced exit for the given price, if any. Stop-loss wins over take-profit.
    pub fn check_exit(&self, entry_price: f64, last_price: f64) -> Option<ExitReason> {
        if last_price <= self.stop_price(entry_price) {
            return Some(ExitReason::StopLoss);
        }

        if last_price >= self.take_profit_price(entry_price) {
            return Some(ExitReason::TakeProfit);
        }

        None
    }
}
