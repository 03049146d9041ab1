//! Mode state machine behavior under sensor and operator events.

use std::time::Duration;

use verne_ctrl::control::{ControlConfig, ControlSystem, SharedControl};
use verne_drive::{DriveConfig, SimDriver, TractionState, TractionSystem};
use verne_proto::event::{
    BatteryEvent, BeaconDirectionEvent, CommandEvent, CurrentEvent, ReceptorEvent,
};
use verne_proto::{AutoState, Command, Direction, Mode, SharedTelemetry, Telemetry};

fn ctrl() -> (SharedControl<SimDriver>, SharedTelemetry) {
    let telemetry = verne_proto::telemetry::shared();
    let traction = TractionSystem::new(SimDriver::new(), DriveConfig::default());
    let sys = ControlSystem::new(ControlConfig::default(), traction, telemetry.clone(), None);
    (sys, telemetry)
}

fn battery(pct: f64) -> BatteryEvent {
    BatteryEvent { snapshot: Telemetry { battery_pct: Some(pct), ..Telemetry::default() } }
}

fn current(amps: f64) -> CurrentEvent {
    CurrentEvent { snapshot: Telemetry { motor_current_a: Some(amps), ..Telemetry::default() } }
}

fn rssi(dbm: i32) -> ReceptorEvent {
    ReceptorEvent { snapshot: Telemetry { rssi_dbm: Some(dbm), ..Telemetry::default() } }
}

#[tokio::test]
async fn battery_saver_latches_and_refuses_operator_modes() {
    let (sys, telemetry) = ctrl();
    let mut c = sys.lock().await;
    assert!(c.change_mode(Mode::Automatic));

    c.on_battery(battery(8.0));
    assert_eq!(c.mode(), Mode::BatterySaver);
    assert!(!c.traction().is_enabled());

    // A repeat reading does not re-enter; the operator cannot escape.
    c.on_battery(battery(8.0));
    assert_eq!(c.mode(), Mode::BatterySaver);
    c.on_command(CommandEvent { command: Command::SelectMode(Mode::Automatic) });
    assert_eq!(c.mode(), Mode::BatterySaver);
    assert!(!c.change_mode(Mode::Idle));

    assert_eq!(telemetry.lock().unwrap().mode.as_deref(), Some("BATTERY_SAVER"));
}

#[tokio::test(start_paused = true)]
async fn current_protection_reverts_after_the_recovery_delay() {
    let (sys, telemetry) = ctrl();
    {
        let mut c = sys.lock().await;
        assert!(c.change_mode(Mode::Automatic));
        c.on_current(current(1.6));
        assert_eq!(c.mode(), Mode::CurrentProtection);
        assert!(!c.traction().is_enabled());
        assert_eq!(telemetry.lock().unwrap().mode.as_deref(), Some("CURRENT_PROTECTION"));
    }

    tokio::time::sleep(Duration::from_millis(3100)).await;
    tokio::task::yield_now().await;
    let c = sys.lock().await;
    assert_eq!(c.mode(), Mode::Automatic);
    assert_eq!(c.auto_state(), Some(AutoState::NotFound));
}

#[tokio::test(start_paused = true)]
async fn superseding_mode_change_cancels_the_pending_revert() {
    let (sys, _telemetry) = ctrl();
    {
        let mut c = sys.lock().await;
        assert!(c.change_mode(Mode::Automatic));
        c.on_current(current(1.6));
        assert_eq!(c.mode(), Mode::CurrentProtection);
        // Operator picks manual before the revert fires; the stale timer
        // must not drag the mode back to automatic.
        c.on_command(CommandEvent { command: Command::SelectMode(Mode::Manual) });
        assert_eq!(c.mode(), Mode::Manual);
    }

    tokio::time::sleep(Duration::from_millis(3100)).await;
    tokio::task::yield_now().await;
    assert_eq!(sys.lock().await.mode(), Mode::Manual);
}

#[tokio::test(start_paused = true)]
async fn battery_interlock_beats_the_pending_revert() {
    let (sys, _telemetry) = ctrl();
    {
        let mut c = sys.lock().await;
        assert!(c.change_mode(Mode::Automatic));
        c.on_current(current(1.6));
        c.on_battery(battery(5.0));
        assert_eq!(c.mode(), Mode::BatterySaver);
    }

    tokio::time::sleep(Duration::from_millis(3100)).await;
    tokio::task::yield_now().await;
    assert_eq!(sys.lock().await.mode(), Mode::BatterySaver);
}

#[tokio::test]
async fn direction_commands_only_drive_in_manual() {
    let (sys, _telemetry) = ctrl();
    let mut c = sys.lock().await;

    assert!(c.change_mode(Mode::Manual));
    let calls_before = c.traction().driver().call_count();
    c.on_command(CommandEvent { command: Command::SetDirection(Direction::Left) });
    assert_eq!(c.traction().state(), TractionState::TurnLeft);
    // One turn means exactly two motor outputs, one per side.
    assert_eq!(c.traction().driver().call_count(), calls_before + 2);

    assert!(c.change_mode(Mode::Automatic));
    let calls_before = c.traction().driver().call_count();
    c.on_command(CommandEvent { command: Command::SetDirection(Direction::Left) });
    assert_eq!(c.traction().driver().call_count(), calls_before);
}

#[tokio::test]
async fn receptor_hysteresis_over_the_three_tiers() {
    let (sys, telemetry) = ctrl();
    let mut c = sys.lock().await;
    assert!(c.change_mode(Mode::Automatic));
    assert_eq!(c.auto_state(), Some(AutoState::NotFound));

    // Too weak: still searching.
    c.on_receptor(rssi(-110));
    assert_eq!(c.auto_state(), Some(AutoState::NotFound));

    // Weak but present: follow.
    c.on_receptor(rssi(-90));
    assert_eq!(c.auto_state(), Some(AutoState::Following));

    // Between follow and stop while following: keep following.
    c.on_receptor(rssi(-82));
    assert_eq!(c.auto_state(), Some(AutoState::Following));

    // Strong: reached, actuator idled.
    c.on_receptor(rssi(-75));
    assert_eq!(c.auto_state(), Some(AutoState::Reached));
    assert_eq!(c.traction().state(), TractionState::Idle);
    assert_eq!(telemetry.lock().unwrap().auto_state.as_deref(), Some("REACHED"));

    // Between follow and stop out of a fresh search: already close enough.
    c.on_receptor(rssi(-110));
    assert_eq!(c.auto_state(), Some(AutoState::NotFound));
    c.on_receptor(rssi(-82));
    assert_eq!(c.auto_state(), Some(AutoState::Reached));
}

#[tokio::test]
async fn beacon_steering_gated_on_mode_state_and_confidence() {
    let (sys, _telemetry) = ctrl();
    let mut c = sys.lock().await;
    assert!(c.change_mode(Mode::Automatic));

    // Not following yet: verdicts are ignored.
    c.on_beacon(BeaconDirectionEvent { angle: Some(0), confident: true });
    assert_eq!(c.traction().state(), TractionState::Idle);

    c.on_receptor(rssi(-90));
    assert_eq!(c.auto_state(), Some(AutoState::Following));

    // Low confidence: ignored.
    c.on_beacon(BeaconDirectionEvent { angle: Some(1), confident: false });
    assert_eq!(c.traction().state(), TractionState::Idle);

    c.on_beacon(BeaconDirectionEvent { angle: Some(0), confident: true });
    assert_eq!(c.traction().state(), TractionState::Forward);

    // Same verdict again: no new actuator calls.
    let calls = c.traction().driver().call_count();
    c.on_beacon(BeaconDirectionEvent { angle: Some(0), confident: true });
    assert_eq!(c.traction().driver().call_count(), calls);

    c.on_beacon(BeaconDirectionEvent { angle: Some(1), confident: true });
    assert_eq!(c.traction().state(), TractionState::TurnLeft);
    c.on_beacon(BeaconDirectionEvent { angle: Some(-1), confident: true });
    assert_eq!(c.traction().state(), TractionState::TurnRight);

    // Signal lost: brake, and stay braked on repeats.
    c.on_beacon(BeaconDirectionEvent { angle: None, confident: true });
    assert_eq!(c.traction().state(), TractionState::Stopped);
    let calls = c.traction().driver().call_count();
    c.on_beacon(BeaconDirectionEvent { angle: None, confident: true });
    assert_eq!(c.traction().driver().call_count(), calls);
}

#[tokio::test]
async fn mode_entry_actions_gate_the_actuator() {
    let (sys, telemetry) = ctrl();
    let mut c = sys.lock().await;
    assert_eq!(c.mode(), Mode::Idle);
    assert!(!c.traction().is_enabled());
    assert_eq!(telemetry.lock().unwrap().mode.as_deref(), Some("IDLE"));

    assert!(c.change_mode(Mode::Automatic));
    assert!(c.traction().is_enabled());
    assert_eq!(c.auto_state(), Some(AutoState::NotFound));

    assert!(c.change_mode(Mode::Manual));
    assert!(c.traction().is_enabled());
    assert_eq!(c.auto_state(), None);
    assert_eq!(telemetry.lock().unwrap().auto_state, None);

    assert!(c.change_mode(Mode::Idle));
    assert!(!c.traction().is_enabled());
}
