//! Background expiry of orders that outlived their time budget.
//!
//! Two budgets apply. An `OPEN` order waits at most the configured max
//! wait for a counter-order; a `MATCHED` pair must confirm payment by
//! its settlement deadline. Either breach expires the order (pairs
//! expire as a whole). `PAID` pairs are exempt: the payment claim says
//! money may already be moving on the banking rail, so only an explicit
//! confirm or reject resolves them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openpeer_orders::{OrderPatch, OrderStore};
use openpeer_types::{EngineConfig, EngineEvent, EventBus, OpenpeerError, OrderStatus};

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `OPEN` orders expired for waiting too long unmatched.
    pub expired_open: usize,
    /// `MATCHED` pairs expired past their settlement deadline
    /// (counted per pair, not per leg).
    pub expired_pairs: usize,
}

impl SweepReport {
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.expired_open == 0 && self.expired_pairs == 0
    }
}

/// Periodically expires overdue orders.
pub struct ExpirySweeper {
    orders: Arc<OrderStore>,
    bus: EventBus,
    config: EngineConfig,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(orders: Arc<OrderStore>, bus: EventBus, config: EngineConfig) -> Self {
        Self {
            orders,
            bus,
            config,
        }
    }

    /// Run sweeps forever at the configured interval.
    ///
    /// Intended to be spawned as a background task; each pass is
    /// independent, so cancellation between passes is always safe.
    pub async fn run(&self) {
        let period = std::time::Duration::from_millis(self.config.sweep_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sweep_once(Utc::now());
            if !report.is_quiet() {
                tracing::info!(
                    expired_open = report.expired_open,
                    expired_pairs = report.expired_pairs,
                    "Expiry sweep"
                );
            }
        }
    }

    /// One sweep pass against the given clock.
    ///
    /// Expiry races against matching, payment claims, and cancellation;
    /// a lost CAS just means another actor resolved the order first, so
    /// those orders are skipped without error.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let open_cutoff = now - self.config.open_max_wait();

        for order in self.orders.snapshot() {
            match order.status {
                OrderStatus::Open if order.created_at <= open_cutoff => {
                    match self.orders.transition(
                        order.id,
                        OrderStatus::Open,
                        OrderStatus::Expired,
                        OrderPatch::default(),
                    ) {
                        Ok(expired) => {
                            report.expired_open += 1;
                            tracing::info!(
                                order = %expired.id,
                                created_at = %expired.created_at,
                                "Unmatched order expired"
                            );
                            self.bus.emit(EngineEvent::OrderExpired {
                                order_id: expired.id,
                                previous_status: OrderStatus::Open,
                            });
                        }
                        Err(err) if err.is_conflict() => {}
                        Err(err) => {
                            tracing::warn!(order = %order.id, error = %err, "Expiry sweep failed");
                        }
                    }
                }
                OrderStatus::Matched if order.deadline.is_some_and(|d| d <= now) => {
                    match self.orders.transition_pair(
                        order.id,
                        OrderStatus::Matched,
                        OrderStatus::Expired,
                        None,
                    ) {
                        Ok((a, b)) => {
                            report.expired_pairs += 1;
                            tracing::info!(
                                order = %a.id,
                                counterparty = %b.id,
                                "Matched pair expired past its payment deadline"
                            );
                            for leg in [&a, &b] {
                                self.bus.emit(EngineEvent::OrderExpired {
                                    order_id: leg.id,
                                    previous_status: OrderStatus::Matched,
                                });
                            }
                        }
                        // The counterpart leg of an already-swept pair,
                        // or a pair that got paid/cancelled first.
                        Err(OpenpeerError::StaleOrderState { .. }) => {}
                        Err(err) => {
                            tracing::warn!(order = %order.id, error = %err, "Expiry sweep failed");
                        }
                    }
                }
                _ => {}
            }
        }
        report
    }
}
