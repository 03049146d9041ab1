//! Capability traits for the hardware the sensor systems consume, plus
//! the simulated implementations selected by configuration. Register-level
//! drivers (I2C ADC, SPI transceiver) implement these traits out of tree.

use anyhow::Result;

/// One calibrated ADC channel. A read returns the converted voltage for
/// whatever the channel is wired to (phase detector, battery divider,
/// current sensor).
pub trait AnalogChannel: Send {
    fn read_voltage(&mut self) -> Result<f64>;
}

/// Received signal strength of the followed beacon, in dBm.
pub trait RadioLink: Send {
    fn read_rssi(&mut self) -> Result<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSample {
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    pub humidity_pct: f64,
}

/// Ambient environment sensor block (temperature/pressure/humidity).
pub trait EnvironmentSource: Send {
    fn sample(&mut self) -> Result<EnvSample>;
}

// ----- Simulated implementations -----

/// Fixed-level channel for bench runs without the ADC attached.
#[derive(Debug, Clone)]
pub struct SimAnalogChannel {
    level_v: f64,
}

impl SimAnalogChannel {
    pub fn new(level_v: f64) -> Self {
        Self { level_v }
    }
}

impl AnalogChannel for SimAnalogChannel {
    fn read_voltage(&mut self) -> Result<f64> {
        Ok(self.level_v)
    }
}

#[derive(Debug, Clone)]
pub struct SimRadioLink {
    rssi_dbm: i32,
}

impl SimRadioLink {
    pub fn new(rssi_dbm: i32) -> Self {
        Self { rssi_dbm }
    }
}

impl RadioLink for SimRadioLink {
    fn read_rssi(&mut self) -> Result<i32> {
        Ok(self.rssi_dbm)
    }
}

#[derive(Debug, Clone)]
pub struct SimEnvironment {
    sample: EnvSample,
}

impl SimEnvironment {
    pub fn new(sample: EnvSample) -> Self {
        Self { sample }
    }
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self::new(EnvSample { temperature_c: 21.0, pressure_hpa: 1013.2, humidity_pct: 45.0 })
    }
}

impl EnvironmentSource for SimEnvironment {
    fn sample(&mut self) -> Result<EnvSample> {
        Ok(self.sample)
    }
}
