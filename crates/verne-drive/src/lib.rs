//! Differential-drive traction system.
//!
//! The physical H-bridge lives behind the [`MotorDriver`] capability trait;
//! this crate owns the drive arithmetic: per-side imbalance scaling, the
//! master enable gate, and the derived traction state. Speed and brake
//! inputs outside their contract range are rejected, never clamped.

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Hardware boundary: signed PWM per side plus the driver power gate.
/// `set_output(0.0)` coasts (idle); `set_brake` shorts the windings with
/// the given duty.
pub trait MotorDriver: Send {
    fn set_output(&mut self, side: Side, value: f64) -> Result<(), DriveError>;
    fn set_brake(&mut self, side: Side, force: f64) -> Result<(), DriveError>;
    fn set_enable(&mut self, enabled: bool);
}

#[derive(Debug, Clone, Error)]
pub enum DriveError {
    #[error("{what} must be within {min}..={max}, got {value}")]
    OutOfRange { what: &'static str, min: f64, max: f64, value: f64 },
    #[error("motor driver fault: {0}")]
    Driver(String),
}

/// Derived state of the drive train, a pure function of the two signed
/// motor values. Nothing is stored beyond the last commanded outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TractionState {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Stopped,
    Idle,
    Unknown,
}

/// Per-side scale multipliers compensating motor thrust imbalance. All
/// values are expected in (0, 1]; calibration, not policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub right_forward_scale: f64,
    pub right_backward_scale: f64,
    pub right_turn_scale: f64,
    pub left_forward_scale: f64,
    pub left_backward_scale: f64,
    pub left_turn_scale: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        // The right motor runs hot on this chassis.
        Self {
            right_forward_scale: 0.69,
            right_backward_scale: 0.69,
            right_turn_scale: 1.0,
            left_forward_scale: 1.0,
            left_backward_scale: 1.0,
            left_turn_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MotorState {
    value: f64,
    braking: bool,
}

pub struct TractionSystem<D: MotorDriver> {
    driver: D,
    cfg: DriveConfig,
    left: MotorState,
    right: MotorState,
    enabled: bool,
}

fn check_range(what: &'static str, min: f64, max: f64, value: f64) -> Result<(), DriveError> {
    if value < min || value > max || value.is_nan() {
        return Err(DriveError::OutOfRange { what, min, max, value });
    }
    Ok(())
}

impl<D: MotorDriver> TractionSystem<D> {
    pub fn new(driver: D, cfg: DriveConfig) -> Self {
        let mut sys = Self {
            driver,
            cfg,
            left: MotorState::default(),
            right: MotorState::default(),
            enabled: false,
        };
        sys.driver.set_enable(false);
        sys
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Drive both motors forwards. `speed` in [0, 1].
    pub fn forward(&mut self, speed: f64) -> Result<(), DriveError> {
        check_range("forward speed", 0.0, 1.0, speed)?;
        self.output(Side::Right, speed * self.cfg.right_forward_scale)?;
        self.output(Side::Left, speed * self.cfg.left_forward_scale)
    }

    /// Drive both motors backwards. `speed` in [0, 1].
    pub fn backward(&mut self, speed: f64) -> Result<(), DriveError> {
        check_range("backward speed", 0.0, 1.0, speed)?;
        self.output(Side::Right, -speed * self.cfg.right_backward_scale)?;
        self.output(Side::Left, -speed * self.cfg.left_backward_scale)
    }

    /// Spin in place. `direction` in [-1, 1]: positive turns
    /// counter-clockwise (left), negative clockwise (right); the magnitude
    /// sets the turning speed.
    pub fn turn(&mut self, direction: f64) -> Result<(), DriveError> {
        check_range("turn direction", -1.0, 1.0, direction)?;
        // Counter-rotate: positive direction spins the right motor forward
        // and the left motor backward.
        self.output(Side::Left, -direction * self.cfg.left_turn_scale)?;
        self.output(Side::Right, direction * self.cfg.right_turn_scale)
    }

    /// Engage brakes symmetrically. `brake_force` in [0, 1].
    pub fn stop(&mut self, brake_force: f64) -> Result<(), DriveError> {
        check_range("brake force", 0.0, 1.0, brake_force)?;
        self.driver.set_brake(Side::Right, brake_force)?;
        self.driver.set_brake(Side::Left, brake_force)?;
        self.right = MotorState { value: 0.0, braking: true };
        self.left = MotorState { value: 0.0, braking: true };
        Ok(())
    }

    /// Cut PWM on both sides (coast). Required before dropping the power
    /// gate.
    pub fn idle(&mut self) -> Result<(), DriveError> {
        self.output(Side::Right, 0.0)?;
        self.output(Side::Left, 0.0)
    }

    /// Master power gate for the whole driver board.
    pub fn toggle_enable(&mut self, enabled: bool) {
        self.driver.set_enable(enabled);
        self.enabled = enabled;
        info!(enabled, "traction driver power gate");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> TractionState {
        let r = self.right.value;
        let l = self.left.value;
        if r > 0.0 && l > 0.0 {
            TractionState::Forward
        } else if r < 0.0 && l < 0.0 {
            TractionState::Backward
        } else if r > 0.0 && l <= 0.0 {
            TractionState::TurnLeft
        } else if r <= 0.0 && l > 0.0 {
            TractionState::TurnRight
        } else if self.right.braking && self.left.braking {
            TractionState::Stopped
        } else if r == 0.0 && l == 0.0 {
            TractionState::Idle
        } else {
            TractionState::Unknown
        }
    }

    fn output(&mut self, side: Side, value: f64) -> Result<(), DriveError> {
        self.driver.set_output(side, value)?;
        let state = MotorState { value, braking: false };
        match side {
            Side::Left => self.left = state,
            Side::Right => self.right = state,
        }
        Ok(())
    }
}

/// Driver stand-in for bench runs and tests: records what would reach the
/// H-bridge.
#[derive(Debug, Default)]
pub struct SimDriver {
    pub left_output: f64,
    pub right_output: f64,
    pub left_brake: f64,
    pub right_brake: f64,
    pub enabled: bool,
    calls: usize,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of output/brake commands issued so far.
    pub fn call_count(&self) -> usize {
        self.calls
    }
}

impl MotorDriver for SimDriver {
    fn set_output(&mut self, side: Side, value: f64) -> Result<(), DriveError> {
        self.calls += 1;
        match side {
            Side::Left => {
                self.left_output = value;
                self.left_brake = 0.0;
            }
            Side::Right => {
                self.right_output = value;
                self.right_brake = 0.0;
            }
        }
        Ok(())
    }

    fn set_brake(&mut self, side: Side, force: f64) -> Result<(), DriveError> {
        self.calls += 1;
        match side {
            Side::Left => {
                self.left_output = 0.0;
                self.left_brake = force;
            }
            Side::Right => {
                self.right_output = 0.0;
                self.right_brake = force;
            }
        }
        Ok(())
    }

    fn set_enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sys() -> TractionSystem<SimDriver> {
        TractionSystem::new(SimDriver::new(), DriveConfig::default())
    }

    #[test]
    fn fresh_system_is_idle_and_disabled() {
        let s = sys();
        assert_eq!(s.state(), TractionState::Idle);
        assert!(!s.is_enabled());
        assert!(!s.driver().enabled);
    }

    #[test]
    fn forward_applies_imbalance_scales() {
        let mut s = sys();
        s.forward(1.0).unwrap();
        assert_eq!(s.state(), TractionState::Forward);
        assert!((s.driver().right_output - 0.69).abs() < 1e-9);
        assert!((s.driver().left_output - 1.0).abs() < 1e-9);
    }

    #[test]
    fn backward_drives_both_sides_negative() {
        let mut s = sys();
        s.backward(0.5).unwrap();
        assert_eq!(s.state(), TractionState::Backward);
        assert!(s.driver().right_output < 0.0);
        assert!(s.driver().left_output < 0.0);
    }

    #[test]
    fn turn_sign_selects_rotation_direction() {
        let mut s = sys();
        s.turn(0.8).unwrap();
        assert_eq!(s.state(), TractionState::TurnLeft);
        s.turn(-0.8).unwrap();
        assert_eq!(s.state(), TractionState::TurnRight);
    }

    #[test]
    fn stop_then_idle_state_sequence() {
        let mut s = sys();
        s.forward(1.0).unwrap();
        s.stop(1.0).unwrap();
        assert_eq!(s.state(), TractionState::Stopped);
        assert!((s.driver().right_brake - 1.0).abs() < 1e-9);
        s.idle().unwrap();
        assert_eq!(s.state(), TractionState::Idle);
    }

    #[test]
    fn out_of_range_inputs_are_rejected_not_clamped() {
        let mut s = sys();
        assert!(matches!(s.forward(1.2), Err(DriveError::OutOfRange { .. })));
        assert!(matches!(s.backward(-0.1), Err(DriveError::OutOfRange { .. })));
        assert!(matches!(s.turn(1.5), Err(DriveError::OutOfRange { .. })));
        assert!(matches!(s.stop(2.0), Err(DriveError::OutOfRange { .. })));
        // Rejected commands leave the drive untouched.
        assert_eq!(s.state(), TractionState::Idle);
    }

    #[test]
    fn toggle_enable_reaches_driver() {
        let mut s = sys();
        s.toggle_enable(true);
        assert!(s.is_enabled());
        assert!(s.driver().enabled);
        s.toggle_enable(false);
        assert!(!s.driver().enabled);
    }
}
