//! TOML config file loading and validation: loop settings, source/target
//! endpoints, MQTT connection, and the device inventory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::clock::parse_utc_offset;
use crate::devices::{Device, DeviceKind, DeviceRegistry};
use crate::endpoint::{Endpoint, EndpointEntry, EndpointError};
use crate::engine::EngineSettings;
use crate::scheduler::ControllerSettings;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Seconds between light samples.
    #[serde(default)]
    pub sample_time: i64,
    /// MJ/m² of accumulated light per irrigation.
    #[serde(default)]
    pub trigger_level: f64,
    #[serde(default)]
    pub reset_midnight: bool,
    #[serde(default = "default_status_interval")]
    pub status_interval_sec: i64,
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_sec: i64,
    /// e.g. "+10:00"; when absent the system's local offset is used.
    #[serde(default)]
    pub utc_offset: Option<String>,
    #[serde(default)]
    pub source: EndpointEntry,
    #[serde(default)]
    pub target: EndpointEntry,
    #[serde(default)]
    pub mqtt: MqttEntry,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MqttEntry {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Telemetry older than this is treated as missing.
    #[serde(default = "default_stale_after")]
    pub stale_after_sec: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub serial: String,
    pub name: String,
    pub growroom: String,
    pub kind: DeviceKind,
}

fn default_status_interval() -> i64 {
    60
}

fn default_gateway_timeout() -> i64 {
    10
}

fn default_mqtt_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "irrigation-controller".to_string()
}

fn default_stale_after() -> i64 {
    300
}

impl Default for MqttEntry {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            stale_after_sec: default_stale_after(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_loop(&mut errors);
        validate_endpoint("source", &self.source, &mut errors);
        validate_endpoint("target", &self.target, &mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_devices(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_loop(&self, errors: &mut Vec<String>) {
        if self.sample_time <= 0 {
            errors.push(format!(
                "sample_time must be positive, got {}",
                self.sample_time
            ));
        }
        if !(self.trigger_level.is_finite() && self.trigger_level > 0.0) {
            errors.push(format!(
                "trigger_level must be positive, got {}",
                self.trigger_level
            ));
        }
        if self.status_interval_sec <= 0 {
            errors.push(format!(
                "status_interval_sec must be positive, got {}",
                self.status_interval_sec
            ));
        }
        if self.gateway_timeout_sec <= 0 {
            errors.push(format!(
                "gateway_timeout_sec must be positive, got {}",
                self.gateway_timeout_sec
            ));
        }
        if let Some(offset) = &self.utc_offset {
            if let Err(e) = parse_utc_offset(offset) {
                errors.push(e);
            }
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
        match (&m.username, &m.password) {
            (Some(_), None) => errors.push("mqtt: username given without password".to_string()),
            (None, Some(_)) => errors.push("mqtt: password given without username".to_string()),
            _ => {}
        }
        if m.stale_after_sec <= 0 {
            errors.push(format!(
                "mqtt: stale_after_sec must be positive, got {}",
                m.stale_after_sec
            ));
        }
    }

    fn validate_devices(&self, errors: &mut Vec<String>) {
        let mut seen_serials: HashSet<&str> = HashSet::new();
        let mut seen_names: HashSet<&str> = HashSet::new();

        for (i, d) in self.devices.iter().enumerate() {
            let ctx = || {
                if d.serial.is_empty() {
                    format!("devices[{i}]")
                } else {
                    format!("device '{}'", d.serial)
                }
            };

            // ── Identity ────────────────────────────────────────
            if d.serial.trim().is_empty() {
                errors.push(format!("{}: serial is empty", ctx()));
            } else if !seen_serials.insert(d.serial.trim()) {
                errors.push(format!("{}: duplicate serial", ctx()));
            }

            if d.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(d.name.trim()) {
                errors.push(format!("{}: duplicate name '{}'", ctx(), d.name));
            }

            if d.growroom.trim().is_empty() {
                errors.push(format!("{}: growroom is empty", ctx()));
            }
        }
    }

    /// Non-fatal inconsistencies: the registry is consulted again on every
    /// call, so these only mean samples or irrigations will fail at runtime.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        let registry = self.registry();
        if registry.is_empty() {
            out.push("no devices configured; every light sample will be invalid".to_string());
        }
        let checks = [
            ("source", &self.source, DeviceKind::Climate),
            ("target", &self.target, DeviceKind::Doser),
        ];
        for (label, entry, kind) in checks {
            match entry.resolve() {
                Ok(Endpoint::Growroom(g)) => {
                    if registry.members(&g, kind).is_empty() {
                        out.push(format!("{label}: growroom '{g}' has no {kind:?} devices"));
                    }
                }
                Ok(Endpoint::Device(r)) => match registry.find(&r) {
                    None => out.push(format!("{label}: {r} is not in [[devices]]")),
                    Some(d) if d.kind != kind => {
                        out.push(format!("{label}: {r} is a {:?} device, expected {kind:?}", d.kind))
                    }
                    Some(_) => {}
                },
                Err(_) => {}
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Derived settings
    // -----------------------------------------------------------------------

    pub fn controller_settings(&self) -> Result<ControllerSettings> {
        Ok(ControllerSettings {
            engine: EngineSettings {
                sample_interval_sec: self.sample_time as u64,
                trigger_level: self.trigger_level,
                reset_midnight: self.reset_midnight,
            },
            source: self.source.resolve().context("invalid source")?,
            target: self.target.resolve().context("invalid target")?,
            status_interval: Duration::from_secs(self.status_interval_sec as u64),
            gateway_timeout: Duration::from_secs(self.gateway_timeout_sec as u64),
        })
    }

    pub fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::new(
            self.devices
                .iter()
                .map(|d| Device {
                    serial: d.serial.trim().to_string(),
                    name: d.name.trim().to_string(),
                    growroom: d.growroom.trim().to_string(),
                    kind: d.kind,
                })
                .collect(),
        )
    }
}

fn validate_endpoint(label: &str, entry: &EndpointEntry, errors: &mut Vec<String>) {
    match entry.resolve() {
        Err(EndpointError::Empty) => {
            errors.push(format!("{label}: no growroom, device or serial given"));
        }
        Ok(_) if !entry.is_valid() => {
            errors.push(format!(
                "{label}: set only one of growroom, device or serial"
            ));
        }
        Ok(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
