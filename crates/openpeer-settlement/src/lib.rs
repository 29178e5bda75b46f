//! # openpeer-settlement
//!
//! **Settlement plane**: drives a matched order pair through
//! payment-sent → payment-confirmed → atomic balance transfer →
//! completion, or rejection/expiry → unwind.
//!
//! ## Architecture
//!
//! 1. **Settlement**: the confirmation handshake. `mark_paid` (SELL leg,
//!    before the deadline), `confirm_received` (BUY leg — executes the
//!    exactly-once balance transfer), `reject` (BUY leg — dispute
//!    unwind, no balance effect), and `reconcile` (restart pass that
//!    finishes half-committed settlements via their deterministic
//!    transaction ids).
//! 2. **ExpirySweeper**: cancels orders that outlived their time budget.
//!    `OPEN` past the max wait and `MATCHED` past the deadline expire;
//!    `PAID` is never touched — real money may already have moved on the
//!    banking rail.
//! 3. **P2pEngine**: the facade consumed by the API layer; wires the
//!    ledger, order store, matcher, settlement, and sweeper together and
//!    exposes the inbound operations plus the event subscription.

pub mod engine;
pub mod sweeper;
pub mod workflow;

pub use engine::P2pEngine;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use workflow::{ReconcileReport, Settlement};
