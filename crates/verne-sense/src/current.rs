//! Motor current monitor. The hall sensor output rides on a mid-rail
//! offset and is noisy under PWM load, so each reading is the mean of a
//! short rolling window rather than a single conversion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use verne_bus::{EventSource, Handler};
use verne_proto::event::CurrentEvent;
use verne_proto::SharedTelemetry;

use crate::capability::AnalogChannel;
use crate::SenseError;

const WINDOW: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CurrentConfig {
    pub poll_hz: f64,
    /// Sensor output at zero current (mid rail).
    pub zero_v: f64,
    /// Volts per ampere.
    pub sensitivity_v_per_a: f64,
}

impl Default for CurrentConfig {
    fn default() -> Self {
        Self { poll_hz: 2.0, zero_v: 2.5, sensitivity_v_per_a: 0.187 }
    }
}

impl CurrentConfig {
    pub fn amps(&self, mean_v: f64) -> f64 {
        (mean_v - self.zero_v) / self.sensitivity_v_per_a
    }
}

pub struct CurrentMonitor {
    cfg: CurrentConfig,
    channel: Mutex<Box<dyn AnalogChannel>>,
    telemetry: SharedTelemetry,
    events: EventSource<CurrentEvent, SenseError>,
    running: AtomicBool,
}

impl CurrentMonitor {
    pub fn new(
        cfg: CurrentConfig,
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

    pub fn subscribe(&mut self, notify: &[Handler<CurrentEvent>], error: &[Handler<SenseError>]) {
        self.events.subscribe(notify, error);
    }

    /// One event per sample once the window is primed; each event carries
    /// the mean over the last four readings.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.cfg.poll_hz);
        let mut window = [0.0f64; WINDOW];
        let mut filled: usize = 0;
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(period).await;
            let voltage = match self.channel.lock().unwrap().read_voltage() {
                Ok(v) => v,
                Err(e) => {
                    self.events.raise_error(SenseError::Analog(format!("{e:#}")));
                    continue;
                }
            };
            window.rotate_right(1);
            window[0] = voltage;
            if filled < WINDOW {
                filled += 1;
                if filled < WINDOW {
                    continue;
                }
            }
            let mean = window.iter().sum::<f64>() / WINDOW as f64;
            let amps = self.cfg.amps(mean);
            debug!(mean, amps, "current sample");
            let snapshot = {
                let mut t = self.telemetry.lock().unwrap();
                t.motor_current_a = Some(amps);
                t.clone()
            };
            self.events.raise_event(CurrentEvent { snapshot });
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use verne_bus::handler;

    #[test]
    fn amps_conversion_from_mid_rail_offset() {
        let cfg = CurrentConfig::default();
        assert_eq!(cfg.amps(2.5), 0.0);
        // 2.5 + 1.4 A * 0.187 V/A
        assert!((cfg.amps(2.7618) - 1.4).abs() < 1e-9);
        assert!(cfg.amps(2.3) < 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_event_until_the_window_is_primed() {
        let telemetry = verne_proto::telemetry::shared();
        let mut monitor = CurrentMonitor::new(
            CurrentConfig::default(),
            Box::new(crate::capability::SimAnalogChannel::new(2.5)),
            telemetry.clone(),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        monitor.subscribe(
            &[handler(move |_: CurrentEvent| {
                let hits = hits2.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })],
            &[],
        );
        let monitor = Arc::new(monitor);
        tokio::spawn(monitor.clone().run());

        // Three samples at 2 Hz: still priming.
        tokio::time::sleep(Duration::from_millis(1501)).await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Fourth sample completes the window and every sample after that
        // produces an event.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        monitor.stop();
        assert!((telemetry.lock().unwrap().motor_current_a.unwrap()).abs() < 1e-9);
    }
}
