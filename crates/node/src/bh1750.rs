//! BH1750 ambient light sensor over I2C.
//!
//! Runs in continuous high-resolution mode (1 lx steps, ~120 ms per
//! conversion) and converts lux to an approximate solar irradiance for
//! the controller, which integrates W/m².

use rppal::i2c::I2c;
use std::{thread, time::Duration};

// ── Commands ────────────────────────────────────────────────────────────────

const CMD_POWER_ON: u8 = 0x01;
const CMD_RESET: u8 = 0x07;
const CMD_CONT_H_RES: u8 = 0x10;

/// ADDR pin low. Pull it high for 0x5C.
pub const DEFAULT_ADDR: u16 = 0x23;

/// First conversion takes up to 180 ms in H-resolution mode.
const FIRST_CONVERSION_WAIT: Duration = Duration::from_millis(180);

/// Datasheet count-to-lux divisor at the default measurement time.
const COUNTS_PER_LUX: f64 = 1.2;

/// Luminous efficacy of daylight, lx per W/m². Good to within ~10% for
/// sunlight; artificial light sources differ considerably.
const LUX_PER_W_M2: f64 = 120.0;

pub fn counts_to_lux(raw: u16) -> f64 {
    raw as f64 / COUNTS_PER_LUX
}

pub fn lux_to_irradiance(lux: f64) -> f64 {
    lux / LUX_PER_W_M2
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Bh1750 {
    i2c: I2c,
}

impl Bh1750 {
    /// Open I2C bus 1 and start continuous measurement at `addr`.
    pub fn new(addr: u16) -> anyhow::Result<Self> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        i2c.write(&[CMD_POWER_ON])?;
        i2c.write(&[CMD_RESET])?;
        i2c.write(&[CMD_CONT_H_RES])?;
        thread::sleep(FIRST_CONVERSION_WAIT);

        tracing::info!(addr = format_args!("0x{addr:02x}"), "bh1750 initialised");

        Ok(Self { i2c })
    }

    /// Latest conversion, in W/m².
    pub fn read_irradiance(&mut self) -> anyhow::Result<f64> {
        let mut buf = [0u8; 2];
        let n = self.i2c.read(&mut buf)?;
        anyhow::ensure!(n == 2, "bh1750 short read ({n} bytes)");
        Ok(lux_to_irradiance(counts_to_lux(u16::from_be_bytes(buf))))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
