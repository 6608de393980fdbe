//! Light accumulation: integrates light readings into energy, tracks the day
//! boundary, and decides when irrigation is due.
//!
//! Readings are W/m², so one sample contributes `light * interval` J/m². The
//! trigger level is configured in MJ/m² and scaled up once at construction;
//! everything shown to people is scaled back down.
//!
//! The engine performs no I/O. It returns what happened on each sample and
//! the control loop does the logging and the irrigation call.

use serde::Serialize;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// J/m² per MJ/m².
pub const ENERGY_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub sample_interval_sec: u64,
    /// MJ/m².
    pub trigger_level: f64,
    pub reset_midnight: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    /// J/m² since the last trigger or reset.
    pub accumulated_energy: f64,
    /// Most recent valid reading, W/m².
    pub last_light: f64,
    pub irrigation_count: u32,
    /// Day of month of the last applied sample.
    pub current_day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// W/m².
    pub light: f64,
    /// MJ/m².
    pub accumulated: f64,
    /// MJ/m².
    pub trigger_level: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayRollover {
    pub previous_day: u8,
    pub day: u8,
    pub energy_cleared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Energy that crossed the threshold, MJ/m².
    pub accumulated: f64,
    /// Irrigation number for the day, starting at 1.
    pub count: u32,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Invalid sample; nothing changed.
    Skipped,
    Applied {
        rollover: Option<DayRollover>,
        trigger: Option<Trigger>,
    },
}

pub struct Engine {
    settings: EngineSettings,
    trigger_energy: f64,
    state: Accumulator,
}

impl Engine {
    pub fn new(settings: EngineSettings, today: u8) -> Self {
        Self {
            settings,
            trigger_energy: settings.trigger_level * ENERGY_SCALE,
            state: Accumulator {
                current_day: today,
                ..Accumulator::default()
            },
        }
    }

    pub fn state(&self) -> &Accumulator {
        &self.state
    }

    /// Apply one sampling tick. `light` is `None` when the reading failed.
    ///
    /// Order: integrate, then day check, then trigger check. A trigger
    /// clears the energy before the caller issues the irrigation command, and
    /// that clear stands even if the command later fails.
    pub fn on_sample(&mut self, light: Option<f64>, now: OffsetDateTime) -> SampleOutcome {
        let Some(light) = light.filter(|v| v.is_finite()) else {
            return SampleOutcome::Skipped;
        };

        self.state.last_light = light;
        self.state.accumulated_energy += light * self.settings.sample_interval_sec as f64;

        let day = now.day();
        let rollover = (day != self.state.current_day).then(|| {
            self.state.irrigation_count = 0;
            if self.settings.reset_midnight {
                self.state.accumulated_energy = 0.0;
            }
            DayRollover {
                previous_day: self.state.current_day,
                day,
                energy_cleared: self.settings.reset_midnight,
            }
        });
        self.state.current_day = day;

        let trigger = (self.state.accumulated_energy > self.trigger_energy).then(|| {
            self.state.irrigation_count += 1;
            let t = Trigger {
                accumulated: self.state.accumulated_energy / ENERGY_SCALE,
                count: self.state.irrigation_count,
                at: now,
            };
            self.state.accumulated_energy = 0.0;
            t
        });

        SampleOutcome::Applied { rollover, trigger }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            light: self.state.last_light,
            accumulated: self.state.accumulated_energy / ENERGY_SCALE,
            trigger_level: self.settings.trigger_level,
        }
    }
}

impl Trigger {
    pub fn timestamp(&self) -> String {
        self.at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.at.to_string())
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "current light: {:.2} W/m2, accumulation: {:.4} MJ/m2, trigger level: {:.4} MJ/m2",
            self.light, self.accumulated, self.trigger_level
        )
    }
}

// ===========================================================================
// Tests
// ===========================================================================
