//! Sensor systems: each one samples a hardware capability on its own
//! schedule, updates the shared telemetry record, and publishes typed
//! events. Hardware access goes through capability traits so bench runs
//! swap in simulated sources via configuration.

pub mod battery;
pub mod beacon;
pub mod capability;
pub mod current;
pub mod doctor;
pub mod environment;
pub mod gps;
pub mod receptor;

use thiserror::Error;

/// Error payload shared by every sensor error channel. Transient by
/// definition: sampling loops report these and keep going.
#[derive(Debug, Clone, Error)]
pub enum SenseError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("malformed nmea sentence: {0}")]
    Nmea(String),
    #[error("analog channel fault: {0}")]
    Analog(String),
    #[error("radio link fault: {0}")]
    Radio(String),
    #[error("environment sensor fault: {0}")]
    Environment(String),
}
