//! Fixed-interval poll, decide, act loop.
//!
//! Cycles never overlap and shutdown is only observed between cycles, so an
//! order being confirmed is always followed through before the process stops.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::{SchedulerConfig, TradingConfig};
use crate::exchange::{AccountMirror, CandleSource};
use crate::execution::{Phase, PositionController, Transition};
use crate::models::{AccountSnapshot, Signal};
use crate::strategy::SignalEngine;
use crate::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub max_cycles: Option<u64>,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_cycles: config.max_cycles,
        }
    }
}

/// Why `run` returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    MaxCycles,
}

pub struct Scheduler {
    trading: TradingConfig,
    settings: SchedulerSettings,
    candles: Arc<dyn CandleSource>,
    account: Arc<dyn AccountMirror>,
    engine: SignalEngine,
    controller: PositionController,
}

impl Scheduler {
    pub fn new(
        trading: TradingConfig,
        settings: SchedulerSettings,
        candles: Arc<dyn CandleSource>,
        account: Arc<dyn AccountMirror>,
        engine: SignalEngine,
        controller: PositionController,
    ) -> Self {
        Self {
            trading,
            settings,
            candles,
            account,
            engine,
            controller,
        }
    }

    pub fn controller(&self) -> &PositionController {
        &self.controller
    }

    /// Run until interrupted, `max_cycles` is reached, or a fatal error.
    ///
    /// Only fatal errors are returned; anything else skips the cycle.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<StopReason> {
        if let Err(e) = self.controller.startup(self.account.as_ref()).await {
            if e.is_fatal() {
                tracing::error!(error = %e, "Startup failed");
                return Err(e);
            }
            tracing::warn!(error = %e, "Startup incomplete, will retry on the first cycle");
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(StopReason::Interrupted);
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    // a dropped sender also means stop
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown requested");
                        return Ok(StopReason::Interrupted);
                    }
                    continue;
                }
            }

            cycles += 1;
            match self.run_cycle().await {
                Ok(transition) => {
                    if transition.from != transition.to {
                        tracing::info!(
                            cycle = cycles,
                            from = ?transition.from,
                            to = ?transition.to,
                            "Cycle complete"
                        );
                    } else {
                        tracing::debug!(cycle = cycles, phase = ?transition.to, "Cycle complete");
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(cycle = cycles, error = %e, "Fatal error, stopping");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(cycle = cycles, error = %e, "Cycle skipped");
                }
            }

            if self.settings.max_cycles.is_some_and(|max| cycles >= max) {
                tracing::info!(cycles, "Reached max cycles");
                return Ok(StopReason::MaxCycles);
            }
        }
    }

    /// One poll, decide, act pass
    pub async fn run_cycle(&mut self) -> Result<Transition> {
        let symbol = self.trading.symbol();

        let balances = self
            .account
            .current_balances(&self.trading.base_asset, &self.trading.quote_asset)
            .await
            .map_err(BotError::from_read)?;
        let last_price = self
            .account
            .last_price(&symbol)
            .await
            .map_err(BotError::from_read)?;
        let snapshot = AccountSnapshot::new(balances, last_price);

        tracing::debug!(
            quote = snapshot.quote_balance,
            base = snapshot.base_balance,
            price = snapshot.last_price,
            "Account refreshed"
        );

        // FLAT with nothing in flight and no money to enter with
        if self.controller.phase() == Phase::Flat
            && snapshot.quote_balance < self.trading.min_quote_balance
        {
            return Err(BotError::InsufficientBalance {
                asset: self.trading.quote_asset.clone(),
                required: self.trading.min_quote_balance,
                available: snapshot.quote_balance,
            });
        }

        let candles = self
            .candles
            .fetch_candles(&symbol, &self.trading.interval, self.trading.candle_limit)
            .await
            .map_err(BotError::from_read)?;
        let trigger_time = candles
            .last()
            .map(|c| c.open_time)
            .ok_or(BotError::InsufficientData {
                required: self.engine.min_candles_required().max(1),
                available: 0,
            })?;

        // an order in flight is followed up, not re-decided
        let signal = if self.controller.pending_order().is_some() {
            Signal::hold()
        } else {
            self.engine.evaluate(&candles)?
        };

        tracing::debug!(decision = ?signal.decision, strength = signal.strength, "Signal");

        self.controller.step(&signal, &snapshot, trigger_time).await
    }
}
