//! Phase-comparison beacon direction detector.
//!
//! Raw ADC samples near the center voltage are too noisy to classify one
//! at a time, so the detector averages a 5-sample window and gates each
//! verdict behind a margin check: the downstream consumer only acts on
//! confident readings, which kills actuator chatter around the thresholds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use verne_bus::{EventSource, Handler};
use verne_proto::event::BeaconDirectionEvent;

use crate::capability::AnalogChannel;
use crate::SenseError;

const WINDOW: usize = 5;

/// Calibration constants tied to the antenna/receiver geometry; never
/// derived at runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub poll_hz: f64,
    /// Ideal straight-ahead phase voltage.
    pub center_v: f64,
    /// Margin below center before deciding to turn right.
    pub right_offset_v: f64,
    /// Margin above center before deciding to turn left.
    pub left_offset_v: f64,
    /// Above this the detector reads the reference rail: no beacon.
    pub max_expected_v: f64,
    /// Deviation beyond a turn threshold required to call a turn confident.
    pub min_turn_margin_v: f64,
    /// Distance to the nearest threshold required to call straight-ahead
    /// confident.
    pub min_straight_margin_v: f64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            poll_hz: 50.0,
            center_v: 1.17,
            right_offset_v: 0.15,
            left_offset_v: 0.15,
            max_expected_v: 1.7,
            min_turn_margin_v: 0.05,
            min_straight_margin_v: 0.02,
        }
    }
}

impl BeaconConfig {
    /// Classifies a window mean into a direction verdict. Deterministic in
    /// the mean alone; monotonic across the three voltage bands.
    pub fn classify(&self, mean_v: f64) -> BeaconDirectionEvent {
        if mean_v > self.max_expected_v {
            // Reading the reference rail: trivially sure there is no signal.
            return BeaconDirectionEvent { angle: None, confident: true };
        }
        let right_threshold = self.center_v - self.right_offset_v;
        let left_threshold = self.center_v + self.left_offset_v;
        // Confidence requires the margin to strictly exceed its constant; a
        // boundary-exact reading stays tentative.
        if mean_v < right_threshold {
            BeaconDirectionEvent {
                angle: Some(-1),
                confident: right_threshold - mean_v > self.min_turn_margin_v,
            }
        } else if mean_v > left_threshold {
            BeaconDirectionEvent {
                angle: Some(1),
                confident: mean_v - left_threshold > self.min_turn_margin_v,
            }
        } else {
            let margin = (mean_v - right_threshold).min(left_threshold - mean_v);
            BeaconDirectionEvent {
                angle: Some(0),
                confident: margin > self.min_straight_margin_v,
            }
        }
    }
}

pub struct BeaconDetector {
    cfg: BeaconConfig,
    channel: Mutex<Box<dyn AnalogChannel>>,
    events: EventSource<BeaconDirectionEvent, SenseError>,
    running: AtomicBool,
}

impl BeaconDetector {
    pub fn new(cfg: BeaconConfig, channel: Box<dyn AnalogChannel>) -> Self {
        Self {
            cfg,
            channel: Mutex::new(channel),
            events: EventSource::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(
        &mut self,
        notify: &[Handler<BeaconDirectionEvent>],
        error: &[Handler<SenseError>],
    ) {
        self.events.subscribe(notify, error);
    }

    /// Sampling loop: one verdict per refilled window. Calling this on an
    /// already-running detector is a no-op.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.cfg.poll_hz);
        let mut window = [0.0f64; WINDOW];
        let mut count: usize = 0;
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
            count += 1;
            if count % WINDOW == 0 {
                let mean = window.iter().sum::<f64>() / WINDOW as f64;
                let verdict = self.cfg.classify(mean);
                debug!(mean, ?verdict, "beacon window");
                self.events.raise_event(verdict);
            }
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
    fn classifies_the_three_bands() {
        let cfg = BeaconConfig::default();
        assert_eq!(cfg.classify(1.9), BeaconDirectionEvent { angle: None, confident: true });
        assert_eq!(cfg.classify(0.80).angle, Some(-1));
        assert_eq!(cfg.classify(1.17).angle, Some(0));
        assert_eq!(cfg.classify(1.55).angle, Some(1));
    }

    #[test]
    fn classification_is_monotonic_in_the_mean() {
        let cfg = BeaconConfig::default();
        let rank = |v: f64| match cfg.classify(v).angle {
            Some(-1) => 0,
            Some(0) => 1,
            Some(1) => 2,
            _ => 3,
        };
        let mut v = 0.5;
        let mut last = rank(v);
        while v < 2.0 {
            let r = rank(v);
            assert!(r >= last, "band regressed at {v}");
            last = r;
            v += 0.01;
        }
    }

    #[test]
    fn turn_confidence_requires_margin_beyond_threshold() {
        let cfg = BeaconConfig::default();
        // Right threshold at 1.02; just below is a low-confidence right.
        let v = cfg.classify(1.01);
        assert_eq!(v.angle, Some(-1));
        assert!(!v.confident);
        let v = cfg.classify(0.90);
        assert_eq!(v.angle, Some(-1));
        assert!(v.confident);
    }

    #[test]
    fn straight_confidence_needs_distance_from_both_thresholds() {
        let cfg = BeaconConfig::default();
        let v = cfg.classify(cfg.center_v);
        assert_eq!(v.angle, Some(0));
        assert!(v.confident);
        // Just inside the right threshold: straight, but not confidently.
        let v = cfg.classify(cfg.center_v - cfg.right_offset_v + 0.005);
        assert_eq!(v.angle, Some(0));
        assert!(!v.confident);
    }

    #[test]
    fn margin_equal_to_the_constant_is_not_confident() {
        // Exactly representable values so the boundary comparison is exact.
        let cfg = BeaconConfig {
            center_v: 1.0,
            right_offset_v: 0.25,
            left_offset_v: 0.25,
            max_expected_v: 2.0,
            min_turn_margin_v: 0.25,
            min_straight_margin_v: 0.125,
            ..BeaconConfig::default()
        };
        // Right threshold 0.75: deviation of exactly 0.25 is tentative.
        let v = cfg.classify(0.5);
        assert_eq!(v.angle, Some(-1));
        assert!(!v.confident);
        assert!(cfg.classify(0.25).confident);
        // Straight margin of exactly 0.125 is tentative too.
        let v = cfg.classify(0.875);
        assert_eq!(v.angle, Some(0));
        assert!(!v.confident);
        assert!(cfg.classify(1.0).confident);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_call_is_a_no_op() {
        let mut detector = BeaconDetector::new(
            BeaconConfig::default(),
            Box::new(crate::capability::SimAnalogChannel::new(1.17)),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        detector.subscribe(
            &[handler(move |_: BeaconDirectionEvent| {
                let hits = hits2.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })],
            &[],
        );
        let detector = Arc::new(detector);
        tokio::spawn(detector.clone().run());
        tokio::spawn(detector.clone().run());

        // One full window at 50 Hz: exactly one event, not two.
        tokio::time::sleep(Duration::from_millis(101)).await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        detector.stop();
    }
}
