//! # openpeer-types
//!
//! Shared types, errors, events, and configuration for the **OpenPeer**
//! P2P fiat on/off-ramp engine.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`OrderId`], [`TxId`], [`EventId`]
//! - **Account model**: [`Account`]
//! - **Order model**: [`Order`], [`OrderSide`], [`OrderStatus`], [`BankDetails`]
//! - **Transaction model**: [`Transaction`], [`TxType`], [`TxStatus`]
//! - **Events**: [`EngineEvent`], [`EventEnvelope`], [`EventBus`]
//! - **Configuration**: [`EngineConfig`]
//! - **Errors**: [`OpenpeerError`] with `PP_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod account;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod order;
pub mod transaction;

// Re-export all primary types at crate root for ergonomic imports:
//   use openpeer_types::{Order, OrderSide, Transaction, ...};

pub use account::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use order::*;
pub use transaction::*;

// Constants are accessed via `openpeer_types::constants::FOO`
// (not re-exported to avoid name collisions).
