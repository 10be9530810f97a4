//! Station clock: monotonic boot time plus a trust-gated wall clock.
//!
//! Every component that needs event identity goes through this type; nobody
//! reads the wall clock directly. A wall-clock value is *trusted* only when
//! an external synchronization succeeded within 2× the sync interval and the
//! resulting epoch lies after 2020-01-01T00:00:00Z. Detection keeps running
//! without trust, but event records are dropped at emit time.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use crate::config::defaults::MIN_VALID_EPOCH_SECS;

/// One successful wall-clock synchronization.
#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    /// Wall-clock milliseconds since epoch at the moment of sync.
    epoch_ms: u64,
    /// Monotonic milliseconds since boot at the moment of sync.
    mono_ms: u64,
}

/// Shared station clock. Cheap to clone via `Arc`; reads are lock-free.
pub struct Clock {
    boot: Instant,
    last_sync: ArcSwapOption<SyncPoint>,
    sync_interval_secs: u64,
}

impl Clock {
    pub fn new(sync_interval_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            boot: Instant::now(),
            last_sync: ArcSwapOption::empty(),
            sync_interval_secs,
        })
    }

    /// Monotonic milliseconds since boot.
    pub fn now_mono(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Record a successful synchronization at `epoch_secs`.
    ///
    /// Values before 2020 are rejected outright: a failed NTP exchange that
    /// reports the epoch must not establish trust.
    pub fn record_sync(&self, epoch_secs: u64) -> bool {
        if epoch_secs < MIN_VALID_EPOCH_SECS {
            tracing::warn!(epoch_secs, "Rejected wall-clock sync before 2020");
            return false;
        }
        self.last_sync.store(Some(Arc::new(SyncPoint {
            epoch_ms: epoch_secs * 1_000,
            mono_ms: self.now_mono(),
        })));
        true
    }

    /// Wall-clock seconds since epoch, or `None` before the first sync.
    pub fn now_wall(&self) -> Option<u64> {
        let sync = self.last_sync.load_full()?;
        let elapsed_ms = self.now_mono().saturating_sub(sync.mono_ms);
        Some((sync.epoch_ms + elapsed_ms) / 1_000)
    }

    /// Whether the wall clock is currently trusted.
    pub fn trusted(&self) -> bool {
        let Some(sync) = self.last_sync.load_full() else {
            return false;
        };
        let age_secs = self.now_mono().saturating_sub(sync.mono_ms) / 1_000;
        if age_secs > 2 * self.sync_interval_secs {
            return false;
        }
        match self.now_wall() {
            Some(wall) => wall > MIN_VALID_EPOCH_SECS,
            None => false,
        }
    }

    /// ISO-8601 rendering of a wall-clock timestamp.
    pub fn format_iso(ts_wall_secs: u64) -> String {
        DateTime::<Utc>::from_timestamp(i64::try_from(ts_wall_secs).unwrap_or(0), 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string())
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("mono_ms", &self.now_mono())
            .field("trusted", &self.trusted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_before_first_sync() {
        let clock = Clock::new(3_600);
        assert!(!clock.trusted());
        assert!(clock.now_wall().is_none());
    }

    #[test]
    fn trusted_after_valid_sync() {
        let clock = Clock::new(3_600);
        assert!(clock.record_sync(1_700_000_000));
        assert!(clock.trusted());
        let wall = clock.now_wall().unwrap();
        assert!(wall >= 1_700_000_000);
    }

    #[test]
    fn pre_2020_sync_rejected() {
        let clock = Clock::new(3_600);
        assert!(!clock.record_sync(946_684_800)); // 2000-01-01
        assert!(!clock.trusted());
    }

    #[test]
    fn monotonic_advances() {
        let clock = Clock::new(3_600);
        let a = clock.now_mono();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_mono();
        assert!(b >= a + 4);
    }

    #[test]
    fn iso_formatting() {
        let iso = Clock::format_iso(1_577_836_800);
        assert!(iso.starts_with("2020-01-01T00:00:00"));
    }
}
