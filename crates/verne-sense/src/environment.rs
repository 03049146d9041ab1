//! Ambient environment monitor (temperature, pressure, humidity).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use verne_bus::{EventSource, Handler};
use verne_proto::event::EnvironmentEvent;
use verne_proto::SharedTelemetry;

use crate::capability::EnvironmentSource;
use crate::SenseError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub poll_hz: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self { poll_hz: 1.0 }
    }
}

pub struct EnvironmentMonitor {
    cfg: EnvironmentConfig,
    source: Mutex<Box<dyn EnvironmentSource>>,
    telemetry: SharedTelemetry,
    events: EventSource<EnvironmentEvent, SenseError>,
    running: AtomicBool,
}

impl EnvironmentMonitor {
    pub fn new(
        cfg: EnvironmentConfig,
        source: Box<dyn EnvironmentSource>,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            cfg,
            source: Mutex::new(source),
            telemetry,
            events: EventSource::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(
        &mut self,
        notify: &[Handler<EnvironmentEvent>],
        error: &[Handler<SenseError>],
    ) {
        self.events.subscribe(notify, error);
    }

    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.cfg.poll_hz);
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(period).await;
            let sample = match self.source.lock().unwrap().sample() {
                Ok(s) => s,
                Err(e) => {
                    self.events.raise_error(SenseError::Environment(format!("{e:#}")));
                    continue;
                }
            };
            let snapshot = {
                let mut t = self.telemetry.lock().unwrap();
                t.temperature_c = Some(sample.temperature_c);
                t.pressure_hpa = Some(sample.pressure_hpa);
                t.humidity_pct = Some(sample.humidity_pct);
                t.clone()
            };
            self.events.raise_event(EnvironmentEvent { snapshot });
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
