//! # openpeer-orders
//!
//! **Order Store** and **Matching Engine** for the OpenPeer P2P ramp.
//!
//! ## Architecture
//!
//! 1. **OrderStore**: keyed order records whose status only moves
//!    through [`OrderStore::transition`] — a compare-and-swap on the
//!    current status. This is the single choke point that stops two
//!    concurrent actors (matcher, sweeper, user cancellation) from both
//!    claiming the same order.
//! 2. **MatchEngine**: pairs a fresh `OPEN` order with the oldest
//!    opposite-side `OPEN` order of equal amount (all-or-nothing), via a
//!    dual CAS that moves both rows `OPEN → MATCHED` atomically.
//!
//! ## Order flow
//!
//! ```text
//! create_order() → OPEN → attempt_match() → MATCHED (deadline stamped)
//!                → mark_paid/confirm path (openpeer-settlement)
//! ```

pub mod matcher;
pub mod store;

pub use matcher::{MatchEngine, MatchOutcome};
pub use store::{OrderPatch, OrderStore};
