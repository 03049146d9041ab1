//! Battery gauge: converts the divider voltage into a charge percentage
//! once a second.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use verne_bus::{EventSource, Handler};
use verne_proto::event::BatteryEvent;
use verne_proto::SharedTelemetry;

use crate::capability::AnalogChannel;
use crate::SenseError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub poll_hz: f64,
    /// Cell voltage read as 0%.
    pub empty_v: f64,
    /// Cell voltage read as 100%.
    pub full_v: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self { poll_hz: 1.0, empty_v: 3.1, full_v: 3.9 }
    }
}

impl BatteryConfig {
    /// Linear interpolation between the empty and full points, clamped so
    /// an over-charged or sagging cell never reports outside 0..=100.
    pub fn percent(&self, voltage: f64) -> f64 {
        ((voltage - self.empty_v) / (self.full_v - self.empty_v) * 100.0).clamp(0.0, 100.0)
    }
}

pub struct BatteryMonitor {
    cfg: BatteryConfig,
    channel: Mutex<Box<dyn AnalogChannel>>,
    telemetry: SharedTelemetry,
    events: EventSource<BatteryEvent, SenseError>,
    running: AtomicBool,
}

impl BatteryMonitor {
    pub fn new(
        cfg: BatteryConfig,
        channel: Box<dyn AnalogChannel>,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            cfg,
            channel: Mutex::new(channel),
            telemetry,
            events: EventSource::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&mut self, notify: &[Handler<BatteryEvent>], error: &[Handler<SenseError>]) {
        self.events.subscribe(notify, error);
    }

    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.cfg.poll_hz);
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(period).await;
            let voltage = match self.channel.lock().unwrap().read_voltage() {
                Ok(v) => v,
                Err(e) => {
                    self.events.raise_error(SenseError::Analog(format!("{e:#}")));
                    continue;
                }
            };
            let pct = self.cfg.percent(voltage);
            debug!(voltage, pct, "battery sample");
            let snapshot = {
                let mut t = self.telemetry.lock().unwrap();
                t.battery_pct = Some(pct);
                t.clone()
            };
            self.events.raise_event(BatteryEvent { snapshot });
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_linear_between_the_calibration_points() {
        let cfg = BatteryConfig::default();
        assert_eq!(cfg.percent(3.1), 0.0);
        assert_eq!(cfg.percent(3.9), 100.0);
        assert!((cfg.percent(3.5) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn percent_clamps_outside_the_cell_range() {
        let cfg = BatteryConfig::default();
        assert_eq!(cfg.percent(2.0), 0.0);
        assert_eq!(cfg.percent(4.2), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_percentage_into_telemetry() {
        let telemetry = verne_proto::telemetry::shared();
        let monitor = Arc::new(BatteryMonitor::new(
            BatteryConfig::default(),
            Box::new(crate::capability::SimAnalogChannel::new(3.5)),
            telemetry.clone(),
        ));
        tokio::spawn(monitor.clone().run());
        tokio::time::sleep(Duration::from_millis(1001)).await;
        monitor.stop();
        let pct = telemetry.lock().unwrap().battery_pct.unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
    }
}
