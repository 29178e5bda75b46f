//! Outbound state-change events and the broadcast bus carrying them.
//!
//! The engine pushes an [`EventEnvelope`] for every committed state
//! change; notification/UI collaborators subscribe or fall back to
//! polling the authoritative stores. Delivery is **at-least-once** —
//! consumers de-duplicate by [`EventId`] or re-read state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{AccountId, EventId, OrderId, OrderStatus};

/// A committed state change, typed per consumer contract (no free-form
/// metadata blobs — each variant carries a fixed, versioned payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    OrderMatched {
        order_id: OrderId,
        counterparty_order: OrderId,
        deadline: DateTime<Utc>,
    },
    OrderPaid {
        order_id: OrderId,
        counterparty_order: OrderId,
    },
    OrderCompleted {
        order_id: OrderId,
        counterparty_order: OrderId,
    },
    OrderExpired {
        order_id: OrderId,
        previous_status: OrderStatus,
    },
    OrderCancelled {
        order_id: OrderId,
        /// Set on the reject path so an admin collaborator can queue the
        /// pair for manual review.
        disputed: bool,
    },
    BalanceChanged {
        account_id: AccountId,
        new_balance: Decimal,
    },
}

impl EngineEvent {
    /// The dotted event name consumed by collaborators.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderMatched { .. } => "order.matched",
            Self::OrderPaid { .. } => "order.paid",
            Self::OrderCompleted { .. } => "order.completed",
            Self::OrderExpired { .. } => "order.expired",
            Self::OrderCancelled { .. } => "order.cancelled",
            Self::BalanceChanged { .. } => "balance.changed",
        }
    }
}

/// A uniquely identified, timestamped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Broadcast bus for engine events.
///
/// Cheap to clone; every clone publishes into the same channel. Emitting
/// with no live subscribers is not an error — the stores remain the
/// authoritative pull interface.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with the given channel capacity. Slow subscribers
    /// that lag past the capacity observe a `Lagged` error and re-poll.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Wrap and publish an event. Fire-and-forget.
    pub fn emit(&self, event: EngineEvent) {
        let envelope = EventEnvelope {
            id: EventId::new(),
            at: Utc::now(),
            event,
        };
        tracing::debug!(event = envelope.event.name(), id = %envelope.id, "Event emitted");
        // A send error only means no receivers are currently subscribed.
        let _ = self.tx.send(envelope);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_CAPACITY)
    }
}
