//! Payload types carried on the event bus. Events are constructed when a
//! sampling loop produces a reading or a message arrives, delivered once to
//! each subscriber, and never persisted.

use crate::command::Command;
use crate::telemetry::Telemetry;

/// Bearing classification from the phase-comparison receiver.
///
/// `angle` is `Some(-1)` (turn clockwise/right), `Some(0)` (straight),
/// `Some(1)` (turn counter-clockwise/left) or `None` when no beacon signal
/// is present. Low-confidence readings must not drive the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconDirectionEvent {
    pub angle: Option<i8>,
    pub confident: bool,
}

#[derive(Debug, Clone)]
pub struct LocationEvent {
    pub snapshot: Telemetry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatelliteInfo {
    pub prn: u16,
    pub elevation_deg: Option<u16>,
    pub azimuth_deg: Option<u16>,
    pub snr_db: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SatelliteListEvent {
    pub satellites: Vec<SatelliteInfo>,
}

/// Both GPS event kinds share one source, so they travel as one payload.
#[derive(Debug, Clone)]
pub enum GpsEvent {
    Location(LocationEvent),
    Satellites(SatelliteListEvent),
}

#[derive(Debug, Clone)]
pub struct BatteryEvent {
    pub snapshot: Telemetry,
}

#[derive(Debug, Clone)]
pub struct CurrentEvent {
    pub snapshot: Telemetry,
}

#[derive(Debug, Clone)]
pub struct ReceptorEvent {
    pub snapshot: Telemetry,
}

#[derive(Debug, Clone)]
pub struct EnvironmentEvent {
    pub snapshot: Telemetry,
}

#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub command: Command,
}

/// A new coordinator session was registered.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Transport failure or timeout while talking to the coordinator.
    Connection,
    /// Three registration attempts exhausted without a 200.
    SessionRegister,
    /// Non-200 on a periodic telemetry push; the loop continues.
    SessionUpdate,
}

#[derive(Debug, Clone)]
pub struct ServerErrorEvent {
    pub kind: ServerErrorKind,
    /// Whether the update loop was running when the error surfaced; drives
    /// the recovery choice (resume loop vs. full re-initialization).
    pub was_running: bool,
}
