//! Beacon receptor monitor: samples the radio RSSI and publishes it for
//! the range hysteresis in the control loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use verne_bus::{EventSource, Handler};
use verne_proto::event::ReceptorEvent;
use verne_proto::SharedTelemetry;

use crate::capability::RadioLink;
use crate::SenseError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceptorConfig {
    pub poll_hz: f64,
}

impl Default for ReceptorConfig {
    fn default() -> Self {
        Self { poll_hz: 2.0 }
    }
}

pub struct ReceptorMonitor {
    cfg: ReceptorConfig,
    radio: Mutex<Box<dyn RadioLink>>,
    telemetry: SharedTelemetry,
    events: EventSource<ReceptorEvent, SenseError>,
    running: AtomicBool,
}

impl ReceptorMonitor {
    pub fn new(cfg: ReceptorConfig, radio: Box<dyn RadioLink>, telemetry: SharedTelemetry) -> Self {
        Self {
            cfg,
            radio: Mutex::new(radio),
            telemetry,
            events: EventSource::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&mut self, notify: &[Handler<ReceptorEvent>], error: &[Handler<SenseError>]) {
        self.events.subscribe(notify, error);
    }

    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.cfg.poll_hz);
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(period).await;
            let rssi = match self.radio.lock().unwrap().read_rssi() {
                Ok(v) => v,
                Err(e) => {
                    self.events.raise_error(SenseError::Radio(format!("{e:#}")));
                    continue;
                }
            };
            debug!(rssi, "receptor sample");
            let snapshot = {
                let mut t = self.telemetry.lock().unwrap();
                t.rssi_dbm = Some(rssi);
                t.clone()
            };
            self.events.raise_event(ReceptorEvent { snapshot });
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn publishes_rssi_into_telemetry() {
        let telemetry = verne_proto::telemetry::shared();
        let monitor = Arc::new(ReceptorMonitor::new(
            ReceptorConfig::default(),
            Box::new(crate::capability::SimRadioLink::new(-88)),
            telemetry.clone(),
        ));
        tokio::spawn(monitor.clone().run());
        tokio::time::sleep(Duration::from_millis(501)).await;
        monitor.stop();
        assert_eq!(telemetry.lock().unwrap().rssi_dbm, Some(-88));
    }
}
