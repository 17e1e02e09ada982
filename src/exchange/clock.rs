//! Server clock offset tracking
//!
//! Signed requests are stamped with venue time, not local time. The clock
//! keeps `offset = server_time - local_time` from the last sync and applies
//! it to every timestamp. A resync is due on a fixed cadence and is forced
//! whenever the venue rejects a request for timestamp skew.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

pub const DEFAULT_RESYNC_INTERVAL_SECS: i64 = 1800;

#[derive(Debug, Clone)]
pub struct ServerClock {
    offset_ms: i64,
    synced_at: Option<DateTime<Utc>>,
    resync_interval: Duration,
}

impl Default for ServerClock {
    fn default() -> Self {
        ServerClock {
            offset_ms: 0,
            synced_at: None,
            resync_interval: Duration::seconds(DEFAULT_RESYNC_INTERVAL_SECS),
        }
    }
}

impl ServerClock {
    /// Record a fresh server-time observation
    pub fn update(&mut self, server_ms: i64, local_ms: i64) {
        self.offset_ms = server_ms - local_ms;
        self.synced_at = Some(Utc::now());
        info!(offset_ms = self.offset_ms, "Server clock synced");
    }

    /// Venue timestamp for a signed request sent now
    pub fn stamp(&self, local_ms: i64) -> i64 {
        local_ms + self.offset_ms
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// True when no sync has happened yet or the cadence has elapsed
    pub fn needs_sync(&self, now: DateTime<Utc>) -> bool {
        match self.synced_at {
            None => true,
            Some(at) => now - at >= self.resync_interval,
        }
    }

    /// Drop the last sync so the next request resyncs first
    pub fn invalidate(&mut self) {
        self.synced_at = None;
    }
}
