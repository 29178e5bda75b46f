//! System-wide constants for the OpenPeer engine.

/// Default settlement window stamped on both legs at match time (minutes).
pub const DEFAULT_MATCH_DEADLINE_MINS: i64 = 20;

/// Default maximum wait for an unmatched OPEN order before expiry (minutes).
pub const DEFAULT_OPEN_MAX_WAIT_MINS: i64 = 10;

/// Default expiry sweep interval in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Bound on read-then-CAS retries (matching scan, ledger adjust) before
/// surfacing contention to the caller.
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 5;

/// Default event broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpenPeer";
