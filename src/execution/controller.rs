use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::executor::{ExecutionOutcome, OrderExecutor};
use crate::config::{OrderTypeConfig, TradingConfig};
use crate::db::StateStore;
use crate::exchange::{AccountMirror, LotSize};
use crate::models::{
    AccountSnapshot, Decision, Order, OrderKind, OrderRequest, Position, PositionState, Side,
    Signal, TradeRecord,
};
use crate::risk::{ExitReason, RiskLimits};
use crate::{BotError, Result};

/// Controller state, including the in-flight phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Flat,
    Long,
    /// BUY outstanding
    Entering,
    /// SELL outstanding
    Exiting,
}

/// What one step did
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    /// Order submitted or followed up this step
    pub order: Option<Order>,
    pub exit_reason: Option<ExitReason>,
}

impl Transition {
    fn idle(phase: Phase) -> Self {
        Self {
            from: phase,
            to: phase,
            order: None,
            exit_reason: None,
        }
    }
}

/// Owns the position and is the only thing that changes it.
///
/// The position moves only on a confirmed fill, and at most one order is
/// outstanding at a time. A drift between the stored position and the live
/// balance latches the controller halted.
pub struct PositionController {
    trading: TradingConfig,
    risk: RiskLimits,
    executor: OrderExecutor,
    store: Arc<dyn StateStore>,
    lot_size: Option<LotSize>,
    position: Position,
    /// Id of the last trade applied to `position`
    version: i64,
    pending: Option<Order>,
    pending_exit: Option<ExitReason>,
    loaded: bool,
    reconciled: bool,
    halted: Option<String>,
}

impl PositionController {
    pub fn new(
        trading: TradingConfig,
        risk: RiskLimits,
        executor: OrderExecutor,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            trading,
            risk,
            executor,
            store,
            lot_size: None,
            position: Position::flat(Utc::now()),
            version: 0,
            pending: None,
            pending_exit: None,
            loaded: false,
            reconciled: false,
            halted: None,
        }
    }

    /// Round order quantities to the symbol's LOT_SIZE filter
    pub fn with_lot_size(mut self, lot_size: LotSize) -> Self {
        self.lot_size = Some(lot_size);
        self
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn pending_order(&self) -> Option<&Order> {
        self.pending.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn phase(&self) -> Phase {
        match (&self.pending, self.position.state) {
            (Some(order), _) if order.side == Side::Buy => Phase::Entering,
            (Some(_), _) => Phase::Exiting,
            (None, PositionState::Flat) => Phase::Flat,
            (None, PositionState::Long) => Phase::Long,
        }
    }

    /// Load the stored position, follow up any order left SUBMITTED and
    /// reconcile against the live balance.
    pub async fn startup(&mut self, account: &dyn AccountMirror) -> Result<()> {
        self.load().await?;

        let unresolved = self.store.unresolved_orders().await?;
        for order in unresolved {
            tracing::info!(order = %order.client_order_id, side = %order.side, "Resuming unconfirmed order");
            self.pending = Some(order);
            self.resume_pending().await?;
            if self.pending.is_some() {
                break;
            }
        }

        if self.pending.is_some() {
            tracing::warn!("Order still unconfirmed, deferring balance reconciliation");
            return Ok(());
        }

        let balances = account
            .current_balances(&self.trading.base_asset, &self.trading.quote_asset)
            .await
            .map_err(BotError::from_read)?;
        self.reconcile(balances.base_balance)
    }

    async fn load(&mut self) -> Result<()> {
        let position = match self.store.load_latest_position().await? {
            Some(position) => position,
            None => {
                let position = Position::flat(Utc::now());
                self.store.save_position(&position).await?;
                tracing::info!("No stored position, starting FLAT");
                position
            }
        };
        self.version = self.store.last_trade_id().await?.unwrap_or(0);
        self.position = position;
        self.loaded = true;

        tracing::info!(
            state = self.position.state.as_str(),
            entry_price = ?self.position.entry_price,
            quantity = self.position.quantity,
            version = self.version,
            "Loaded position"
        );
        Ok(())
    }

    /// Run one decision cycle
    pub async fn step(
        &mut self,
        signal: &Signal,
        snapshot: &AccountSnapshot,
        trigger_time: DateTime<Utc>,
    ) -> Result<Transition> {
        if let Some(reason) = &self.halted {
            return Err(BotError::PositionDrift(reason.clone()));
        }

        if !self.loaded {
            self.load().await?;
        }

        if self.pending.is_none() {
            // pick up anything a failed write left behind
            self.pending = self.store.unresolved_orders().await?.into_iter().next();
        }
        if self.pending.is_some() {
            return self.resume_pending().await;
        }

        if !self.reconciled {
            self.reconcile(snapshot.base_balance)?;
        }

        match self.position.state {
            PositionState::Flat => self.step_flat(signal, snapshot, trigger_time).await,
            PositionState::Long => self.step_long(signal, snapshot, trigger_time).await,
        }
    }

    async fn step_flat(
        &mut self,
        signal: &Signal,
        snapshot: &AccountSnapshot,
        trigger_time: DateTime<Utc>,
    ) -> Result<Transition> {
        if signal.decision != Decision::Buy {
            return Ok(Transition::idle(Phase::Flat));
        }

        if snapshot.quote_balance < self.trading.min_quote_balance {
            tracing::warn!(
                quote_balance = snapshot.quote_balance,
                min_quote_balance = self.trading.min_quote_balance,
                "BUY signal but quote balance too low, staying FLAT"
            );
            return Ok(Transition::idle(Phase::Flat));
        }

        let quantity = self.normalize(self.trading.trade_quantity).ok_or_else(|| {
            BotError::Config(format!(
                "trade_quantity {} is below the symbol's lot size",
                self.trading.trade_quantity
            ))
        })?;

        let request = self.request(Side::Buy, quantity, snapshot.last_price, trigger_time);
        tracing::info!(
            strength = signal.strength,
            quantity,
            price = snapshot.last_price,
            "BUY signal, entering"
        );
        self.execute(request, None).await
    }

    async fn step_long(
        &mut self,
        signal: &Signal,
        snapshot: &AccountSnapshot,
        trigger_time: DateTime<Utc>,
    ) -> Result<Transition> {
        let entry_price = self
            .position
            .entry_price
            .ok_or_else(|| BotError::InvalidPosition("LONG without entry price".to_string()))?;

        // risk exits take priority over the signal
        let exit_reason = match self.risk.check_exit(entry_price, snapshot.last_price) {
            Some(reason) => reason,
            None if signal.decision == Decision::Sell => ExitReason::StrategySell,
            None => return Ok(Transition::idle(Phase::Long)),
        };

        // fees in the base asset can leave less than was bought
        let available = self.position.quantity.min(snapshot.base_balance);
        let Some(quantity) = self.normalize(available) else {
            let reason = format!(
                "LONG {} {} but only {} sellable on the exchange",
                self.position.quantity, self.trading.base_asset, snapshot.base_balance
            );
            return Err(self.halt(reason));
        };

        let pnl_pct = (snapshot.last_price - entry_price) / entry_price * 100.0;
        tracing::info!(
            reason = %exit_reason,
            entry_price,
            price = snapshot.last_price,
            pnl_pct,
            quantity,
            "Exiting LONG"
        );

        let request = self.request(Side::Sell, quantity, snapshot.last_price, trigger_time);
        self.execute(request, Some(exit_reason)).await
    }

    fn request(
        &self,
        side: Side,
        quantity: f64,
        last_price: f64,
        trigger_time: DateTime<Utc>,
    ) -> OrderRequest {
        OrderRequest {
            symbol: self.trading.symbol(),
            side,
            quantity,
            kind: match self.trading.order_type {
                OrderTypeConfig::Market => OrderKind::Market,
                OrderTypeConfig::Limit => OrderKind::Limit { price: last_price },
            },
            trigger_time,
            position_version: self.version,
        }
    }

    fn normalize(&self, quantity: f64) -> Option<f64> {
        match &self.lot_size {
            Some(lot) => lot.normalize(quantity),
            None if quantity > 0.0 => Some(quantity),
            None => None,
        }
    }

    async fn execute(
        &mut self,
        request: OrderRequest,
        exit_reason: Option<ExitReason>,
    ) -> Result<Transition> {
        let from = self.phase();
        self.pending_exit = exit_reason;

        let outcome = match self.executor.submit(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.pending_exit = None;
                return Err(e);
            }
        };
        let mut transition = self.apply(outcome).await?;
        transition.from = from;
        transition.exit_reason = exit_reason.filter(|_| transition.to != Phase::Long);
        Ok(transition)
    }

    /// Follow up the outstanding order instead of issuing a new one
    async fn resume_pending(&mut self) -> Result<Transition> {
        let Some(order) = self.pending.clone() else {
            return Ok(Transition::idle(self.phase()));
        };
        let from = self.phase();

        let outcome = self.executor.confirm(order).await?;
        let exit_reason = self.pending_exit;
        let mut transition = self.apply(outcome).await?;
        transition.from = from;
        transition.exit_reason = exit_reason.filter(|_| transition.to != Phase::Long);
        Ok(transition)
    }

    async fn apply(&mut self, outcome: ExecutionOutcome) -> Result<Transition> {
        match outcome {
            ExecutionOutcome::Filled(order) => self.commit_fill(order).await,
            ExecutionOutcome::Pending(order) => {
                self.pending = Some(order.clone());
                Ok(Transition {
                    from: self.phase(),
                    to: self.phase(),
                    order: Some(order),
                    exit_reason: None,
                })
            }
            ExecutionOutcome::Failed(order) => {
                tracing::warn!(
                    order = %order.client_order_id,
                    side = %order.side,
                    error = order.error.as_deref().unwrap_or(""),
                    "Order failed, position unchanged"
                );
                self.clear_pending();
                Ok(Transition {
                    from: self.phase(),
                    to: self.phase(),
                    order: Some(order),
                    exit_reason: None,
                })
            }
            ExecutionOutcome::Duplicate(order) => {
                tracing::warn!(
                    order = %order.client_order_id,
                    side = %order.side,
                    "Decision already executed, skipping"
                );
                self.clear_pending();
                Ok(Transition {
                    from: self.phase(),
                    to: self.phase(),
                    order: Some(order),
                    exit_reason: None,
                })
            }
        }
    }

    async fn commit_fill(&mut self, order: Order) -> Result<Transition> {
        let trade = TradeRecord::from_fill(&order).ok_or_else(|| {
            BotError::InvalidPosition(format!("order {} has no fill", order.client_order_id))
        })?;

        let next = match (order.side, self.position.state) {
            (Side::Buy, PositionState::Flat) => {
                Position::long(trade.price, trade.quantity, trade.timestamp)?
            }
            (Side::Sell, PositionState::Long) => self.after_sell(&order, &trade)?,
            (side, state) => {
                let reason = format!(
                    "{} fill for {} while {}",
                    side,
                    order.client_order_id,
                    state.as_str()
                );
                return Err(self.halt(reason));
            }
        };

        let from = self.phase();
        self.version = self.store.commit_fill(&order, &trade, &next).await?;

        if order.side == Side::Sell {
            if let Some(entry) = self.position.entry_price {
                tracing::info!(
                    pnl = (trade.price - entry) * trade.quantity,
                    "Realized PnL"
                );
            }
        }

        self.position = next;
        self.clear_pending();

        tracing::info!(
            state = self.position.state.as_str(),
            price = trade.price,
            quantity = trade.quantity,
            "Position updated"
        );

        Ok(Transition {
            from,
            to: self.phase(),
            order: Some(order),
            exit_reason: None,
        })
    }

    /// FLAT after a full SELL; a partial one stays LONG with the unsold rest
    fn after_sell(&self, order: &Order, trade: &TradeRecord) -> Result<Position> {
        let unsold = order.requested_quantity - trade.quantity;
        match self.position.entry_price {
            Some(entry_price) if unsold > 0.0 && unsold >= self.trading.dust_threshold => {
                tracing::warn!(
                    sold = trade.quantity,
                    unsold,
                    "SELL only partially filled, still LONG"
                );
                Position::long(entry_price, unsold, self.position.opened_at)
            }
            _ => Ok(Position::flat(trade.timestamp)),
        }
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.pending_exit = None;
    }

    /// Compare the stored position with the live base balance
    fn reconcile(&mut self, base_balance: f64) -> Result<()> {
        if let Some(reason) = drift_reason(
            &self.position,
            &self.trading.base_asset,
            base_balance,
            self.trading.dust_threshold,
        ) {
            return Err(self.halt(reason));
        }

        self.reconciled = true;
        tracing::info!(base_balance, state = self.position.state.as_str(), "Position reconciled");
        Ok(())
    }

    fn halt(&mut self, reason: String) -> BotError {
        tracing::error!(reason = %reason, "Position drift, halting automated trading");
        self.halted = Some(reason.clone());
        BotError::PositionDrift(reason)
    }
}

/// Why a stored position disagrees with the exchange balance, if it does.
///
/// Anything below `dust` counts as holding nothing.
pub fn drift_reason(
    position: &Position,
    base_asset: &str,
    base_balance: f64,
    dust: f64,
) -> Option<String> {
    match position.state {
        PositionState::Long if base_balance < dust => Some(format!(
            "stored LONG {} {} but exchange holds {}",
            position.quantity, base_asset, base_balance
        )),
        PositionState::Flat if base_balance >= dust => Some(format!(
            "stored FLAT but exchange holds {} {}",
            base_balance, base_asset
        )),
        _ => None,
    }
}
