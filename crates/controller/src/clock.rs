//! Wall-clock access for day-boundary detection and trigger timestamps.

use anyhow::{Context, Result};
use time::{macros::format_description, OffsetDateTime, UtcOffset};
use tracing::warn;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Live clock pinned to a fixed UTC offset, so "midnight" means local
/// midnight for that offset.
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Parse "+10:00" / "-03:30" style offsets.
pub fn parse_utc_offset(s: &str) -> Result<UtcOffset, String> {
    let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(s.trim(), format)
        .map_err(|e| format!("invalid utc_offset '{s}' (expected e.g. +10:00): {e}"))
}

/// Use the configured offset if any, else the system's local offset.
///
/// Must run before the async runtime starts: the local offset can only be
/// read safely while the process is single-threaded.
pub fn resolve_offset(configured: Option<&str>) -> Result<UtcOffset> {
    if let Some(s) = configured {
        return parse_utc_offset(s)
            .map_err(anyhow::Error::msg)
            .context("failed to resolve utc offset");
    }
    match UtcOffset::current_local_offset() {
        Ok(offset) => Ok(offset),
        Err(e) => {
            warn!("local utc offset unavailable ({e}); midnight is UTC midnight");
            Ok(UtcOffset::UTC)
        }
    }
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Clock whose time only moves when a test says so.
    #[derive(Clone)]
    pub(crate) struct ManualClock(Arc<Mutex<OffsetDateTime>>);

    impl ManualClock {
        pub(crate) fn at(t: OffsetDateTime) -> Self {
            Self(Arc::new(Mutex::new(t)))
        }

        pub(crate) fn set(&self, t: OffsetDateTime) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
