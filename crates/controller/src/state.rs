use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::engine::StatusSnapshot;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// Written by the control loop and the MQTT pump, read by the web API.
/// The accumulator itself never lives here.
pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub snapshot: Option<StatusSnapshot>,
    pub irrigation_count: u32,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvalidSample,
    Midnight,
    Irrigation,
    Gateway,
    Status,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub snapshot: Option<StatusSnapshot>,
    pub irrigation_count: u32,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            snapshot: None,
            irrigation_count: 0,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record_invalid_sample(&mut self, detail: String) {
        self.push_event(EventKind::InvalidSample, detail);
    }

    /// Day rollover; the irrigation counter restarts from zero.
    pub fn record_midnight(&mut self, detail: String) {
        self.irrigation_count = 0;
        self.push_event(EventKind::Midnight, detail);
    }

    pub fn record_irrigation(&mut self, count: u32, detail: String) {
        self.irrigation_count = count;
        self.push_event(EventKind::Irrigation, detail);
    }

    pub fn record_gateway_error(&mut self, detail: String) {
        self.push_event(EventKind::Gateway, detail);
    }

    pub fn record_snapshot(&mut self, snapshot: StatusSnapshot) {
        self.snapshot = Some(snapshot);
        self.push_event(EventKind::Status, snapshot.to_string());
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            snapshot: self.snapshot,
            irrigation_count: self.irrigation_count,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_capped() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 10) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 10");
    }

    #[test]
    fn status_lists_newest_first() {
        let mut st = SystemState::new();
        st.record_system("first".into());
        st.record_error("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }

    #[test]
    fn irrigation_count_follows_events() {
        let mut st = SystemState::new();
        st.record_irrigation(3, "third".into());
        assert_eq!(st.irrigation_count, 3);
        st.record_midnight("new day".into());
        assert_eq!(st.irrigation_count, 0);
    }

    #[test]
    fn snapshot_is_kept_and_logged() {
        let mut st = SystemState::new();
        let snap = StatusSnapshot {
            light: 250.0,
            accumulated: 0.125,
            trigger_level: 0.5,
        };
        st.record_snapshot(snap);
        assert_eq!(st.snapshot, Some(snap));
        assert_eq!(st.events.back().unwrap().kind, EventKind::Status);
    }

    #[test]
    fn status_serializes_kinds_in_snake_case() {
        let mut st = SystemState::new();
        st.record_invalid_sample("growroom 'Room 9' doesn't exist".into());
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["events"][0]["kind"], "invalid_sample");
        assert!(json["snapshot"].is_null());
        assert!(json["events"][0]["ts"].is_string());
    }
}
