//! Stateful solar irradiance simulator for local development.
//!
//! Models what a light sensor in a greenhouse would see:
//! - Diurnal half-sine between sunrise (06:00) and sunset (18:00)
//! - Cloud transmittance as a mean-reverting random walk, per scenario
//! - Small per-reading sensor noise
//!
//! Readings are in W/m², never negative.

use std::fmt;

/// Clear-sky irradiance at solar noon, W/m².
const PEAK_IRRADIANCE: f64 = 1000.0;

/// Daylight window as fractions of the simulated day.
const SUNRISE: f64 = 0.25;
const SUNSET: f64 = 0.75;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6 is close to N(0,1).
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Sky conditions selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Near full transmittance, barely any variation.
    Clear,
    /// Broken cloud: transmittance wanders widely between samples.
    Cloudy,
    /// Heavy, steady cover. Slow accumulation, useful for checking the
    /// controller stays idle.
    Overcast,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cloudy" => Self::Cloudy,
            "overcast" => Self::Overcast,
            _ => Self::Clear, // default
        }
    }

    /// (mean transmittance, walk sigma, mean reversion, min, max)
    fn cloud_params(self) -> (f64, f64, f64, f64, f64) {
        match self {
            Self::Clear => (0.95, 0.01, 0.3, 0.85, 1.0),
            Self::Cloudy => (0.6, 0.15, 0.1, 0.15, 1.0),
            Self::Overcast => (0.25, 0.03, 0.2, 0.1, 0.4),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::Cloudy => write!(f, "cloudy"),
            Self::Overcast => write!(f, "overcast"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct LightSim {
    day_period_s: f64,
    transmittance: f64,
    mean_transmittance: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    min_transmittance: f64,
    max_transmittance: f64,
    noise_sigma: f64,
}

impl LightSim {
    /// `day_period_s` is the length of one simulated day. Use 600 for fast
    /// dev iteration or 86400 for real time.
    pub fn new(scenario: Scenario, day_period_s: f64) -> Self {
        let (mean, sigma, reversion, min, max) = scenario.cloud_params();
        Self {
            day_period_s: day_period_s.max(1.0),
            transmittance: mean,
            mean_transmittance: mean,
            walk_sigma: sigma,
            mean_reversion: reversion,
            min_transmittance: min,
            max_transmittance: max,
            noise_sigma: 3.0,
        }
    }

    /// Clear-sky irradiance at `t_s` seconds into the cycle.
    pub fn clear_sky(&self, t_s: f64) -> f64 {
        let phase = t_s.rem_euclid(self.day_period_s) / self.day_period_s;
        if !(SUNRISE..=SUNSET).contains(&phase) {
            return 0.0;
        }
        let x = (phase - SUNRISE) / (SUNSET - SUNRISE);
        PEAK_IRRADIANCE * (std::f64::consts::PI * x).sin()
    }

    /// Produce the next reading for time `t_s`. Cloud cover evolves with
    /// every call.
    pub fn sample_at(&mut self, t_s: f64) -> f64 {
        let pull = self.mean_reversion * (self.mean_transmittance - self.transmittance);
        let walk = gaussian(0.0, self.walk_sigma);
        self.transmittance = (self.transmittance + pull + walk)
            .clamp(self.min_transmittance, self.max_transmittance);

        let clear = self.clear_sky(t_s);
        if clear == 0.0 {
            return 0.0;
        }
        (clear * self.transmittance + gaussian(0.0, self.noise_sigma)).max(0.0)
    }

    /// Sample against the wall clock.
    pub fn sample(&mut self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.sample_at(now_s)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
