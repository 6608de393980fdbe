use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Light telemetry published by a node on `tele/<serial>/light`.
#[derive(Debug, Deserialize)]
pub(crate) struct LightMsg {
    pub(crate) ts: i64,
    /// Irradiance in W/m².
    pub(crate) light: f64,
}

/// Command published on `dose/<serial>/irrigate`.
#[derive(Debug, Serialize)]
pub(crate) struct IrrigateMsg {
    pub(crate) ts: i64,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

pub(crate) const LIGHT_SUBSCRIPTION: &str = "tele/+/light";

/// Extract the device serial from "tele/<serial>/light".
pub(crate) fn extract_light_serial(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "light" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

pub(crate) fn irrigate_topic(serial: &str) -> String {
    format!("dose/{serial}/irrigate")
}

/// Parse a telemetry payload, rejecting readings that cannot be integrated.
pub(crate) fn parse_light(payload: &[u8]) -> Result<LightMsg, String> {
    let msg: LightMsg =
        serde_json::from_slice(payload).map_err(|e| format!("bad light json: {e}"))?;
    if !msg.light.is_finite() || msg.light < 0.0 {
        return Err(format!("implausible light value {}", msg.light));
    }
    Ok(msg)
}

// ===========================================================================
// Tests
// ===========================================================================
