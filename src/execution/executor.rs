use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::db::StateStore;
use crate::error::ExchangeError;
use crate::exchange::{NewOrder, OrderGateway, OrderReport};
use crate::models::{Order, OrderKind, OrderRequest, OrderStatus};
use crate::{BotError, Result};

/// Result of driving one order as far as it will go this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Fill observed; the caller commits it (the journal still says SUBMITTED)
    Filled(Order),
    /// Acknowledged but no fill observed yet; journaled SUBMITTED
    Pending(Order),
    /// Journaled FAILED, never executed
    Failed(Order),
    /// This key was already filled and committed earlier
    Duplicate(Order),
}

impl ExecutionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ExecutionOutcome::Filled(o)
            | ExecutionOutcome::Pending(o)
            | ExecutionOutcome::Failed(o)
            | ExecutionOutcome::Duplicate(o) => o,
        }
    }
}

/// Keys tried for one decision whose earlier orders closed unfilled
const MAX_REVISIONS: u32 = 8;

/// Deterministic client order id for a decision.
///
/// A decision is (symbol, side, trigger candle, position version); the
/// revision only moves on after an order for it closed without a fill.
pub fn idempotency_key(request: &OrderRequest, revision: u32) -> String {
    let name = format!(
        "{}:{}:{}:{}:{}",
        request.symbol,
        request.side.as_str(),
        request.trigger_time.timestamp_millis(),
        request.position_version,
        revision
    );
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    format!("tb-{}", id.simple())
}

/// Submits orders without ever executing the same decision twice.
///
/// Every order is journaled as SUBMITTED before it reaches the network, and
/// after any ambiguous failure the exchange is asked about the key before
/// anything is sent again.
pub struct OrderExecutor {
    gateway: Arc<dyn OrderGateway>,
    store: Arc<dyn StateStore>,
    settings: ExecutionConfig,
}

impl OrderExecutor {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn StateStore>,
        settings: ExecutionConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    pub async fn submit(&self, request: &OrderRequest) -> Result<ExecutionOutcome> {
        for revision in 0..MAX_REVISIONS {
            let key = idempotency_key(request, revision);
            let Some(existing) = self.store.find_order(&key).await? else {
                return self.send(request, key).await;
            };

            if existing.status == OrderStatus::Filled {
                tracing::info!(order = %key, "Order already filled for this decision, not resubmitting");
                return Ok(ExecutionOutcome::Duplicate(existing));
            }

            match self.lookup(&existing).await {
                Ok(Some(report)) if report.is_dead() => {
                    // provably never executed, the decision gets a fresh key
                    tracing::info!(order = %key, status = ?report.status, "Earlier order closed without a fill");
                    if existing.status == OrderStatus::Submitted {
                        let reason = format!("order ended {:?} without a fill", report.status);
                        self.fail(existing, reason).await?;
                    }
                }
                Ok(Some(report)) => return self.resolve(existing, report).await,
                Ok(None) => {
                    tracing::info!(order = %key, "Journaled order unknown to exchange, submitting again");
                    return self.send(request, key).await;
                }
                Err(ExchangeError::Authentication(msg)) => {
                    return Err(BotError::AuthenticationFailed(msg))
                }
                Err(e) => {
                    // cannot prove it is absent, so do not send a second copy
                    tracing::warn!(order = %key, error = %e, "Could not look up journaled order");
                    return Ok(ExecutionOutcome::Pending(existing));
                }
            }
        }

        Err(BotError::OrderSubmissionFailed(format!(
            "{} {} orders for this decision closed without a fill",
            MAX_REVISIONS, request.side
        )))
    }

    /// Journal a fresh order under `key`, then place it
    async fn send(&self, request: &OrderRequest, key: String) -> Result<ExecutionOutcome> {
        let order = Order::submitted(request, key);
        self.store.record_order(&order).await?;
        self.place_with_retry(order).await
    }

    /// Follow up on an order journaled SUBMITTED in an earlier cycle or run.
    ///
    /// An order still open after `order_timeout_secs` is cancelled.
    pub async fn confirm(&self, order: Order) -> Result<ExecutionOutcome> {
        match self.lookup(&order).await {
            Ok(Some(report)) if !report.status.is_terminal() && self.is_stale(&order) => {
                self.cancel_stale(order).await
            }
            Ok(Some(report)) => self.resolve(order, report).await,
            Ok(None) => self.fail(order, "order not found on exchange".to_string()).await,
            Err(ExchangeError::Authentication(msg)) => Err(BotError::AuthenticationFailed(msg)),
            Err(e) => {
                tracing::warn!(order = %order.client_order_id, error = %e, "Order status unavailable");
                Ok(ExecutionOutcome::Pending(order))
            }
        }
    }

    async fn place_with_retry(&self, order: Order) -> Result<ExecutionOutcome> {
        let new_order = NewOrder {
            symbol: order.symbol.clone(),
            side: order.side,
            kind: match order.requested_price {
                Some(price) => OrderKind::Limit { price },
                None => OrderKind::Market,
            },
            quantity: order.requested_quantity,
            client_order_id: order.client_order_id.clone(),
        };
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error: Option<ExchangeError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.backoff(attempt - 1)).await;

                // the previous attempt may have reached the exchange
                match self.lookup(&order).await {
                    Ok(Some(report)) => return self.resolve(order, report).await,
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => return self.reject(order, e).await,
                }
            }

            tracing::debug!(
                order = %order.client_order_id,
                side = %order.side,
                attempt,
                max_attempts,
                "Placing order"
            );

            match self.gateway.place_order(&new_order).await {
                Ok(report) => return self.resolve(order, report).await,
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        order = %order.client_order_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transient order failure"
                    );
                    last_error = Some(e);
                }
                Err(e) => return self.reject(order, e).await,
            }
        }

        // one last look before giving up on it
        if let Ok(Some(report)) = self.lookup(&order).await {
            return self.resolve(order, report).await;
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt succeeded".to_string());
        self.fail(
            order,
            format!("gave up after {} attempts: {}", max_attempts, reason),
        )
        .await
    }

    fn is_stale(&self, order: &Order) -> bool {
        (Utc::now() - order.submitted_at)
            .to_std()
            .is_ok_and(|age| age >= self.settings.order_timeout())
    }

    async fn cancel_stale(&self, mut order: Order) -> Result<ExecutionOutcome> {
        tracing::warn!(
            order = %order.client_order_id,
            side = %order.side,
            timeout_secs = self.settings.order_timeout_secs,
            "Order open too long, cancelling"
        );

        let cancelled = self
            .gateway
            .cancel_order(&order.symbol, &order.client_order_id)
            .await;
        let report = match cancelled {
            Ok(Some(report)) => report,
            // closed in the meantime, possibly filled
            Ok(None) => match self.lookup(&order).await {
                Ok(Some(report)) => report,
                Ok(None) => {
                    return self
                        .fail(order, "order not found on exchange".to_string())
                        .await
                }
                Err(ExchangeError::Authentication(msg)) => {
                    return Err(BotError::AuthenticationFailed(msg))
                }
                Err(e) => {
                    tracing::warn!(order = %order.client_order_id, error = %e, "Order status unavailable");
                    return Ok(ExecutionOutcome::Pending(order));
                }
            },
            Err(ExchangeError::Authentication(msg)) => {
                return Err(BotError::AuthenticationFailed(msg))
            }
            Err(e) => {
                tracing::warn!(order = %order.client_order_id, error = %e, "Cancel failed, retrying next cycle");
                return Ok(ExecutionOutcome::Pending(order));
            }
        };

        order.exchange_order_id = Some(report.exchange_order_id);
        if let Some((price, quantity)) = report.confirmed_fill() {
            // partially filled before the cancel landed
            return Ok(self.filled(order, &report, price, quantity));
        }
        if report.is_dead() {
            let reason = format!(
                "cancelled after {}s without a fill",
                self.settings.order_timeout_secs
            );
            return self.fail(order, reason).await;
        }

        self.store.record_order(&order).await?;
        Ok(ExecutionOutcome::Pending(order))
    }

    async fn lookup(&self, order: &Order) -> std::result::Result<Option<OrderReport>, ExchangeError> {
        self.gateway
            .query_order(&order.symbol, &order.client_order_id)
            .await
    }

    /// Turn an exchange report into an outcome, polling for a fill if needed
    async fn resolve(&self, mut order: Order, mut report: OrderReport) -> Result<ExecutionOutcome> {
        order.exchange_order_id = Some(report.exchange_order_id);

        for attempt in 0..=self.settings.confirm_attempts {
            if let Some((price, quantity)) = report.confirmed_fill() {
                return Ok(self.filled(order, &report, price, quantity));
            }
            if report.is_dead() {
                return self
                    .fail(order, format!("order ended {:?} without a fill", report.status))
                    .await;
            }
            if attempt == self.settings.confirm_attempts {
                break;
            }

            tokio::time::sleep(self.settings.confirm_delay()).await;
            match self.lookup(&order).await {
                Ok(Some(latest)) => report = latest,
                Ok(None) => {}
                Err(ExchangeError::Authentication(msg)) => {
                    return Err(BotError::AuthenticationFailed(msg))
                }
                Err(e) => {
                    tracing::debug!(order = %order.client_order_id, error = %e, "Fill check failed");
                }
            }
        }

        tracing::warn!(
            order = %order.client_order_id,
            status = ?report.status,
            "Order acknowledged but not yet filled"
        );
        self.store.record_order(&order).await?;
        Ok(ExecutionOutcome::Pending(order))
    }

    fn filled(&self, mut order: Order, report: &OrderReport, price: f64, quantity: f64) -> ExecutionOutcome {
        order.status = OrderStatus::Filled;
        order.fill_price = Some(price);
        order.filled_quantity = Some(quantity);
        order.fill_time = Some(report.transact_time.unwrap_or_else(Utc::now));
        order.error = None;

        tracing::info!(
            side = %order.side,
            symbol = %order.symbol,
            quantity,
            price,
            commission_asset = report.commission_asset().unwrap_or("-"),
            quote_value = quantity * price,
            order_type = %report.order_type,
            exchange_order_id = report.exchange_order_id,
            transact_time = ?order.fill_time,
            "order executed"
        );

        ExecutionOutcome::Filled(order)
    }

    /// Non-transient exchange error: auth propagates, anything else fails the order
    async fn reject(&self, order: Order, error: ExchangeError) -> Result<ExecutionOutcome> {
        match error {
            ExchangeError::Authentication(msg) => {
                self.fail(order, format!("authentication rejected: {}", msg))
                    .await?;
                Err(BotError::AuthenticationFailed(msg))
            }
            other => self.fail(order, other.to_string()).await,
        }
    }

    async fn fail(&self, mut order: Order, reason: String) -> Result<ExecutionOutcome> {
        tracing::error!(
            order = %order.client_order_id,
            side = %order.side,
            reason = %reason,
            "Order failed"
        );
        order.status = OrderStatus::Failed;
        order.error = Some(reason);
        self.store.record_order(&order).await?;
        Ok(ExecutionOutcome::Failed(order))
    }

    /// Exponential delay plus up to 25% jitter
    fn backoff(&self, retry: u32) -> Duration {
        let base = backoff_ms(&self.settings, retry);
        let jitter = if base >= 4 {
            rand::thread_rng().gen_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// base × 2^(retry-1), capped at max_backoff_ms
fn backoff_ms(settings: &ExecutionConfig, retry: u32) -> u64 {
    let exp = settings
        .base_backoff_ms
        .saturating_mul(1u64 << retry.saturating_sub(1).min(20));
    exp.min(settings.max_backoff_ms)
}
