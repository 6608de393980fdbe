//! Device inventory and latest light telemetry.
//!
//! The registry is static (built from `[[devices]]` in the config file) and
//! answers membership questions for growrooms. The reading cache is written
//! by the MQTT pump and read by the gateway.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::endpoint::DeviceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Climate controller carrying a light sensor.
    Climate,
    /// Nutrient doser that can be forced to irrigate.
    Doser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub name: String,
    pub growroom: String,
    pub kind: DeviceKind,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn find(&self, r: &DeviceRef) -> Option<&Device> {
        match r {
            DeviceRef::Serial(s) => self.devices.iter().find(|d| &d.serial == s),
            DeviceRef::Name(n) => self.devices.iter().find(|d| &d.name == n),
        }
    }

    pub fn find_serial(&self, serial: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.serial == serial)
    }

    pub fn growroom_exists(&self, growroom: &str) -> bool {
        self.devices.iter().any(|d| d.growroom == growroom)
    }

    /// Members of `growroom` of the given kind, in declaration order.
    pub fn members(&self, growroom: &str, kind: DeviceKind) -> Vec<&Device> {
        self.devices
            .iter()
            .filter(|d| d.growroom == growroom && d.kind == kind)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Reading cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CachedReading {
    light: f64,
    received: Instant,
}

pub type SharedReadings = Arc<RwLock<ReadingCache>>;

#[derive(Debug)]
pub struct ReadingCache {
    readings: HashMap<String, CachedReading>,
    stale_after: Duration,
}

impl ReadingCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            readings: HashMap::new(),
            stale_after,
        }
    }

    pub fn record(&mut self, serial: &str, light: f64) {
        self.readings.insert(
            serial.to_string(),
            CachedReading {
                light,
                received: Instant::now(),
            },
        );
    }

    /// Latest reading for `serial`, or `None` if missing or stale.
    pub fn fresh(&self, serial: &str) -> Option<f64> {
        self.readings
            .get(serial)
            .filter(|r| r.received.elapsed() <= self.stale_after)
            .map(|r| r.light)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(serial: &str, name: &str, room: &str, kind: DeviceKind) -> Device {
        Device {
            serial: serial.into(),
            name: name.into(),
            growroom: room.into(),
            kind,
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(vec![
            dev("ICL-1", "Climate A", "Room 1", DeviceKind::Climate),
            dev("IDS-1", "Doser A", "Room 1", DeviceKind::Doser),
            dev("IDS-2", "Doser B", "Room 1", DeviceKind::Doser),
            dev("ICL-2", "Climate B", "Room 2", DeviceKind::Climate),
        ])
    }

    // -- Registry -----------------------------------------------------------

    #[test]
    fn find_by_serial_and_name() {
        let reg = registry();
        assert_eq!(
            reg.find(&DeviceRef::Serial("IDS-2".into())).unwrap().name,
            "Doser B"
        );
        assert_eq!(
            reg.find(&DeviceRef::Name("Climate B".into())).unwrap().serial,
            "ICL-2"
        );
        assert!(reg.find(&DeviceRef::Name("nope".into())).is_none());
    }

    #[test]
    fn growroom_membership() {
        let reg = registry();
        assert!(reg.growroom_exists("Room 1"));
        assert!(!reg.growroom_exists("Room 9"));
        let dosers: Vec<_> = reg
            .members("Room 1", DeviceKind::Doser)
            .iter()
            .map(|d| d.serial.as_str())
            .collect();
        assert_eq!(dosers, vec!["IDS-1", "IDS-2"]);
        assert!(reg.members("Room 2", DeviceKind::Doser).is_empty());
    }

    // -- Reading cache ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cache_returns_fresh_reading() {
        let mut cache = ReadingCache::new(Duration::from_secs(60));
        cache.record("ICL-1", 420.0);
        assert_eq!(cache.fresh("ICL-1"), Some(420.0));
        assert_eq!(cache.fresh("ICL-2"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_drops_stale_reading() {
        let mut cache = ReadingCache::new(Duration::from_secs(60));
        cache.record("ICL-1", 420.0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.fresh("ICL-1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_newer_reading_replaces_older() {
        let mut cache = ReadingCache::new(Duration::from_secs(60));
        cache.record("ICL-1", 100.0);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.record("ICL-1", 200.0);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.fresh("ICL-1"), Some(200.0));
    }
}
