//! Configuration for the OpenPeer engine.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Engine-wide timing and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Settlement window stamped on both legs at match time (minutes).
    pub match_deadline_mins: i64,
    /// Maximum wait for an unmatched OPEN order before expiry (minutes).
    pub open_max_wait_mins: i64,
    /// Expiry sweep interval in milliseconds.
    pub sweep_interval_ms: u64,
    /// Bound on read-then-CAS retries before surfacing contention.
    pub max_cas_retries: u32,
    /// Event broadcast channel capacity.
    pub event_capacity: usize,
}

impl EngineConfig {
    /// The match deadline as a `chrono` duration.
    #[must_use]
    pub fn match_deadline(&self) -> Duration {
        Duration::minutes(self.match_deadline_mins)
    }

    /// The unmatched-order max wait as a `chrono` duration.
    #[must_use]
    pub fn open_max_wait(&self) -> Duration {
        Duration::minutes(self.open_max_wait_mins)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_deadline_mins: constants::DEFAULT_MATCH_DEADLINE_MINS,
            open_max_wait_mins: constants::DEFAULT_OPEN_MAX_WAIT_MINS,
            sweep_interval_ms: constants::DEFAULT_SWEEP_INTERVAL_MS,
            max_cas_retries: constants::DEFAULT_MAX_CAS_RETRIES,
            event_capacity: constants::DEFAULT_EVENT_CAPACITY,
        }
    }
}
