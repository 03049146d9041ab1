use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Whole-rover telemetry record, serialized wholesale by the uplink.
///
/// Every field is optional: no component guarantees population order, and
/// readers must tolerate `None` anywhere. Writers replace whole fields,
/// never merge. The wire names match what the coordination server expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(rename = "temperature")]
    pub temperature_c: Option<f64>,
    #[serde(rename = "pressure")]
    pub pressure_hpa: Option<f64>,
    #[serde(rename = "humidity")]
    pub humidity_pct: Option<f64>,
    pub num_satellites: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(rename = "altitude")]
    pub altitude_m: Option<f64>,
    pub message: Option<String>,
    #[serde(rename = "rssi")]
    pub rssi_dbm: Option<i32>,
    #[serde(rename = "session_state")]
    pub mode: Option<String>,
    #[serde(rename = "session_substate")]
    pub auto_state: Option<String>,
    #[serde(rename = "battery")]
    pub battery_pct: Option<f64>,
    #[serde(rename = "motor_current")]
    pub motor_current_a: Option<f64>,
    #[serde(rename = "timestamp")]
    pub ts_unix_ms: Option<i64>,
    pub rover_id: Option<String>,
    pub session_id: Option<String>,
}

/// Handle shared by every writer and the uplink. All mutation happens on
/// the tokio runtime and locks are only held for whole-field assignment,
/// never across an await.
pub type SharedTelemetry = Arc<Mutex<Telemetry>>;

pub fn shared() -> SharedTelemetry {
    Arc::new(Mutex::new(Telemetry::default()))
}
