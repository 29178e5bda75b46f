//! Order types for the OpenPeer P2P engine.
//!
//! An order is a user's request to buy or sell platform balance against
//! fiat, settled peer-to-peer via bank transfer. Matching pairs an OPEN
//! buy order with an OPEN sell order of equal amount; the internal
//! balance moves only after mutual confirmation (escrow-style transfer).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, OrderId};

/// Which side of the ramp this order is on.
///
/// A BUY order adds internal balance (the owner pays fiat); a SELL order
/// cashes internal balance out (the owner's bank details are captured at
/// creation so the counterpart knows where to settle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side a counter-order must be on to pair with this one.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle status of an order.
///
/// Transitions are monotonic and guarded by compare-and-swap in the
/// order store:
///
/// ```text
/// OPEN ──► MATCHED ──► PAID ──► COMPLETED
///   │         │          │
///   │         ├► EXPIRED └► CANCELLED   (reject path only)
///   └───────► CANCELLED
/// ```
///
/// `PAID` never expires automatically — once payment is claimed, only
/// the explicit confirm/reject path resolves the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Matched,
    Paid,
    Completed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal states are immutable: no transition leaves them.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Whether the state machine permits `self → to`.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::Matched | Self::Cancelled | Self::Expired)
                | (Self::Matched, Self::Paid | Self::Cancelled | Self::Expired)
                | (Self::Paid, Self::Completed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Matched => write!(f, "MATCHED"),
            Self::Paid => write!(f, "PAID"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Bank-settlement details, snapshotted at SELL-order creation.
///
/// Captured once so the counterpart settles against the details the
/// seller had when the order was placed, even if they change later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub iban: String,
    pub bank_name: String,
    pub account_holder: String,
}

impl BankDetails {
    #[must_use]
    pub fn new(
        iban: impl Into<String>,
        bank_name: impl Into<String>,
        account_holder: impl Into<String>,
    ) -> Self {
        Self {
            iban: iban.into(),
            bank_name: bank_name.into(),
            account_holder: account_holder.into(),
        }
    }
}

/// Core order struct.
///
/// The counterparty fields are `None` until the matching engine pairs
/// the order; from `MATCHED` onward both are set and the pair moves
/// through the state machine together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: AccountId,
    pub side: OrderSide,
    /// Requested amount of internal balance. Immutable after creation;
    /// pairing is all-or-nothing (no partial fills).
    pub amount: Decimal,
    pub status: OrderStatus,
    pub counterparty_order: Option<OrderId>,
    pub counterparty_account: Option<AccountId>,
    /// Present on SELL orders only.
    pub bank_details: Option<BankDetails>,
    /// Settlement deadline, stamped on both legs at match time.
    pub deadline: Option<DateTime<Utc>>,
    pub buyer_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether this order still occupies its owner's active-order slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether the order has been paired with a counter-order.
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.counterparty_order.is_some()
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    pub fn dummy(side: OrderSide, amount: Decimal) -> Self {
        Self::dummy_for_account(AccountId::new(), side, amount)
    }

    pub fn dummy_for_account(owner: AccountId, side: OrderSide, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            owner,
            side,
            amount,
            status: OrderStatus::Open,
            counterparty_order: None,
            counterparty_account: None,
            bank_details: match side {
                OrderSide::Sell => Some(BankDetails::new("TR000000000000000000000001", "Testbank", "Test Holder")),
                OrderSide::Buy => None,
            },
            deadline: None,
            buyer_confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
