//! Source/target addressing: a config descriptor names either a whole
//! growroom or a single device (by name or serial). Resolution happens once,
//! at config time, and every gateway call matches on the resulting variant.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Config descriptor
// ---------------------------------------------------------------------------

/// The `[source]` / `[target]` table as written in the config file.
/// Exactly one field is expected to be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointEntry {
    #[serde(default)]
    pub growroom: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub serial: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("no growroom, device or serial given")]
    Empty,
}

// ---------------------------------------------------------------------------
// Resolved endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    Serial(String),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Growroom(String),
    Device(DeviceRef),
}

impl EndpointEntry {
    /// Exactly one addressing field is filled in.
    pub fn is_valid(&self) -> bool {
        self.filled() == 1
    }

    /// Serial wins over device name, device name wins over growroom.
    pub fn resolve(&self) -> Result<Endpoint, EndpointError> {
        if !is_blank(&self.serial) {
            return Ok(Endpoint::Device(DeviceRef::Serial(
                self.serial.trim().to_string(),
            )));
        }
        if !is_blank(&self.device) {
            return Ok(Endpoint::Device(DeviceRef::Name(
                self.device.trim().to_string(),
            )));
        }
        if !is_blank(&self.growroom) {
            return Ok(Endpoint::Growroom(self.growroom.trim().to_string()));
        }
        Err(EndpointError::Empty)
    }

    fn filled(&self) -> usize {
        [&self.growroom, &self.device, &self.serial]
            .iter()
            .filter(|f| !is_blank(f))
            .count()
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(s) => write!(f, "serial {s}"),
            Self::Name(n) => write!(f, "device '{n}'"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Growroom(g) => write!(f, "growroom '{g}'"),
            Self::Device(d) => d.fmt(f),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
