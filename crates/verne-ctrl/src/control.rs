use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verne_drive::{MotorDriver, TractionState, TractionSystem};
use verne_proto::event::{
    BatteryEvent, BeaconDirectionEvent, CommandEvent, CurrentEvent, ReceptorEvent,
    ServerErrorEvent, ServerErrorKind,
};
use verne_proto::{AutoState, Command, Direction, Mode, SharedTelemetry};
use verne_uplink::Uplink;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Charge percentage below which the rover latches into battery saver.
    pub battery_saver_pct: f64,
    /// Motor current above which protection cuts the drive.
    pub current_protection_a: f64,
    /// How long protection holds before reverting to the previous mode.
    pub current_recovery_s: f64,
    pub rssi_stop_dbm: i32,
    pub rssi_follow_dbm: i32,
    pub rssi_giveup_dbm: i32,
    pub turn_speed: f64,
    pub cruise_speed: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            battery_saver_pct: 10.0,
            current_protection_a: 1.4,
            current_recovery_s: 3.0,
            rssi_stop_dbm: -79,
            rssi_follow_dbm: -85,
            rssi_giveup_dbm: -105,
            turn_speed: 0.8,
            cruise_speed: 1.0,
        }
    }
}

pub type SharedControl<D> = Arc<tokio::sync::Mutex<ControlSystem<D>>>;

pub struct ControlSystem<D: MotorDriver> {
    cfg: ControlConfig,
    mode: Mode,
    auto_state: Option<AutoState>,
    traction: TractionSystem<D>,
    telemetry: SharedTelemetry,
    uplink: Option<Arc<Uplink>>,
    weak: Weak<tokio::sync::Mutex<Self>>,
    pending_revert: Option<JoinHandle<()>>,
}

impl<D: MotorDriver + 'static> ControlSystem<D> {
    /// Builds the control system already in `Idle`: actuator coasting,
    /// power gate down, telemetry mode stamped.
    pub fn new(
        cfg: ControlConfig,
        mut traction: TractionSystem<D>,
        telemetry: SharedTelemetry,
        uplink: Option<Arc<Uplink>>,
    ) -> SharedControl<D> {
        if let Err(e) = traction.idle() {
            warn!(error = %e, "traction fault while entering idle");
        }
        traction.toggle_enable(false);
        {
            let mut t = telemetry.lock().unwrap();
            t.mode = Some(Mode::Idle.as_name().to_string());
            t.auto_state = None;
        }
        Arc::new_cyclic(|weak| {
            tokio::sync::Mutex::new(Self {
                cfg,
                mode: Mode::Idle,
                auto_state: None,
                traction,
                telemetry,
                uplink,
                weak: weak.clone(),
                pending_revert: None,
            })
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn auto_state(&self) -> Option<AutoState> {
        self.auto_state
    }

    pub fn traction(&self) -> &TractionSystem<D> {
        &self.traction
    }

    /// Applies a mode transition and its entry actions. Returns whether the
    /// transition was accepted: battery saver is terminal, every request
    /// out of it is refused. An accepted transition cancels any pending
    /// protection revert so a stale timer cannot drag the mode backwards.
    pub fn change_mode(&mut self, target: Mode) -> bool {
        if self.mode == Mode::BatterySaver {
            info!(%target, "mode change refused: battery saver latched");
            return false;
        }
        self.cancel_pending_revert();
        self.mode = target;
        let drive = match target {
            Mode::Idle | Mode::CurrentProtection | Mode::BatterySaver => {
                self.set_auto_state(None);
                let r = self.traction.idle();
                self.traction.toggle_enable(false);
                r
            }
            Mode::Automatic => {
                self.set_auto_state(Some(AutoState::NotFound));
                let r = self.traction.idle();
                self.traction.toggle_enable(true);
                r
            }
            Mode::Manual => {
                self.set_auto_state(None);
                let r = self.traction.idle();
                self.traction.toggle_enable(true);
                r
            }
        };
        if let Err(e) = drive {
            warn!(error = %e, "traction fault during mode entry");
        }
        info!(mode = %self.mode, "mode changed");
        self.telemetry.lock().unwrap().mode = Some(self.mode.as_name().to_string());
        true
    }

    // ----- Event handlers -----

    /// Beacon verdicts steer only while actively following. The traction
    /// command is skipped when the verdict is not confident or already
    /// matches the current drive state, so borderline windows cannot make
    /// the actuator chatter.
    pub fn on_beacon(&mut self, ev: BeaconDirectionEvent) {
        if self.mode != Mode::Automatic || self.auto_state != Some(AutoState::Following) {
            return;
        }
        let target = match ev.angle {
            None => TractionState::Stopped,
            Some(0) => TractionState::Forward,
            Some(a) if a > 0 => TractionState::TurnLeft,
            Some(_) => TractionState::TurnRight,
        };
        if !ev.confident || self.traction.state() == target {
            return;
        }
        let drive = match ev.angle {
            None => self.traction.stop(1.0),
            Some(0) => self.traction.forward(self.cfg.cruise_speed),
            Some(a) => self.traction.turn(f64::from(a.signum()) * self.cfg.turn_speed),
        };
        if let Err(e) = drive {
            warn!(error = %e, "traction fault while following beacon");
        }
    }

    pub fn on_battery(&mut self, ev: BatteryEvent) {
        let Some(pct) = ev.snapshot.battery_pct else { return };
        if pct < self.cfg.battery_saver_pct && self.mode != Mode::BatterySaver {
            warn!(pct, "battery below saver threshold");
            self.change_mode(Mode::BatterySaver);
        }
    }

    /// Over-current cuts the drive immediately and arms a one-shot revert
    /// to the interrupted mode. The revert is only armed when the cut was
    /// accepted (the battery interlock may refuse it).
    pub fn on_current(&mut self, ev: CurrentEvent) {
        let Some(amps) = ev.snapshot.motor_current_a else { return };
        if amps > self.cfg.current_protection_a && self.mode != Mode::CurrentProtection {
            warn!(amps, "motor current above protection threshold");
            let previous = self.mode;
            if self.change_mode(Mode::CurrentProtection) {
                self.schedule_revert(previous);
            }
        }
    }

    /// Range hysteresis over the beacon RSSI. Between the follow and stop
    /// thresholds an ongoing follow keeps going, while a search does not
    /// start one: that gap is what keeps the rover from oscillating at the
    /// target boundary.
    pub fn on_receptor(&mut self, ev: ReceptorEvent) {
        if self.mode != Mode::Automatic {
            return;
        }
        let Some(rssi) = ev.snapshot.rssi_dbm else { return };
        if rssi < self.cfg.rssi_giveup_dbm {
            self.set_auto_state(Some(AutoState::NotFound));
            self.idle_traction();
        } else if rssi < self.cfg.rssi_follow_dbm {
            self.set_auto_state(Some(AutoState::Following));
        } else if rssi > self.cfg.rssi_stop_dbm
            || (rssi > self.cfg.rssi_follow_dbm && self.auto_state == Some(AutoState::NotFound))
        {
            self.set_auto_state(Some(AutoState::Reached));
            self.idle_traction();
        }
    }

    pub fn on_command(&mut self, ev: CommandEvent) {
        debug!(command = ?ev.command, "operator command");
        match ev.command {
            Command::SetDirection(direction) => {
                if self.mode != Mode::Manual {
                    debug!(mode = %self.mode, "direction command ignored outside manual");
                    return;
                }
                let drive = match direction {
                    Direction::Stop => self.traction.stop(1.0),
                    Direction::Left => self.traction.turn(self.cfg.turn_speed),
                    Direction::Right => self.traction.turn(-self.cfg.turn_speed),
                    Direction::Forwards => self.traction.forward(self.cfg.cruise_speed),
                    Direction::Backwards => self.traction.backward(self.cfg.cruise_speed),
                };
                match drive {
                    Ok(()) => info!(state = ?self.traction.state(), "manual direction set"),
                    Err(e) => warn!(error = %e, "traction fault on manual command"),
                }
            }
            Command::SelectMode(mode) => {
                // Operators may only request the three nominal modes; the
                // protective modes are entered by the rover alone.
                if !matches!(mode, Mode::Idle | Mode::Automatic | Mode::Manual) {
                    warn!(%mode, "operator may not select a protective mode");
                    return;
                }
                self.change_mode(mode);
            }
            Command::NewSession => {
                if let Some(uplink) = &self.uplink {
                    tokio::spawn(uplink.clone().initialize_session(true));
                }
            }
        }
    }

    pub fn on_server_error(&mut self, ev: ServerErrorEvent) {
        let Some(uplink) = self.uplink.clone() else { return };
        match ev.kind {
            ServerErrorKind::Connection => {
                warn!(was_running = ev.was_running, "server connection error");
                if ev.was_running {
                    tokio::spawn(uplink.run_update_loop());
                } else {
                    tokio::spawn(uplink.initialize_session(false));
                }
            }
            ServerErrorKind::SessionRegister => {
                warn!("session registration error, re-initializing");
                tokio::spawn(uplink.initialize_session(false));
            }
            ServerErrorKind::SessionUpdate => {
                // The push loop already carried on; nothing to restart.
                warn!("session update rejected by server");
            }
        }
    }

    // ----- Internals -----

    fn schedule_revert(&mut self, previous: Mode) {
        let weak = self.weak.clone();
        let delay = Duration::from_secs_f64(self.cfg.current_recovery_s);
        self.pending_revert = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(ctrl) = weak.upgrade() {
                let mut c = ctrl.lock().await;
                c.pending_revert = None;
                c.change_mode(previous);
            }
        }));
    }

    fn cancel_pending_revert(&mut self) {
        if let Some(handle) = self.pending_revert.take() {
            handle.abort();
        }
    }

    fn set_auto_state(&mut self, state: Option<AutoState>) {
        self.auto_state = state;
        self.telemetry.lock().unwrap().auto_state =
            state.map(|s| s.as_name().to_string());
    }

    fn idle_traction(&mut self) {
        if let Err(e) = self.traction.idle() {
            warn!(error = %e, "traction fault while idling");
        }
    }
}

impl<D: MotorDriver> Drop for ControlSystem<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending_revert.take() {
            handle.abort();
        }
    }
}
