//! Glue between the event sources and the control system: each `attach_*`
//! subscribes a handler that locks the control mutex and forwards the
//! payload to the matching `on_*` method.

use tracing::warn;
use verne_bus::{handler, Handler};
use verne_drive::MotorDriver;
use verne_proto::event::{
    BatteryEvent, BeaconDirectionEvent, CommandEvent, CurrentEvent, ReceptorEvent,
    ServerErrorEvent,
};
use verne_proto::CommandError;
use verne_sense::battery::BatteryMonitor;
use verne_sense::beacon::BeaconDetector;
use verne_sense::current::CurrentMonitor;
use verne_sense::receptor::ReceptorMonitor;
use verne_sense::SenseError;
use verne_uplink::Uplink;

use crate::command::CommandReceiver;
use crate::control::SharedControl;

/// Error-channel handler that logs and drops. Sensor errors are transient;
/// none of them changes the control state.
pub fn sense_error_logger(component: &'static str) -> Handler<SenseError> {
    handler(move |e: SenseError| async move {
        warn!(component, error = %e, "sensor error");
    })
}

pub fn attach_beacon<D: MotorDriver + Send + 'static>(
    detector: &mut BeaconDetector,
    ctrl: &SharedControl<D>,
) {
    let ctrl = ctrl.clone();
    detector.subscribe(
        &[handler(move |ev: BeaconDirectionEvent| {
            let ctrl = ctrl.clone();
            async move {
                ctrl.lock().await.on_beacon(ev);
            }
        })],
        &[sense_error_logger("beacon")],
    );
}

pub fn attach_battery<D: MotorDriver + Send + 'static>(
    monitor: &mut BatteryMonitor,
    ctrl: &SharedControl<D>,
) {
    let ctrl = ctrl.clone();
    monitor.subscribe(
        &[handler(move |ev: BatteryEvent| {
            let ctrl = ctrl.clone();
            async move {
                ctrl.lock().await.on_battery(ev);
            }
        })],
        &[sense_error_logger("battery")],
    );
}

pub fn attach_current<D: MotorDriver + Send + 'static>(
    monitor: &mut CurrentMonitor,
    ctrl: &SharedControl<D>,
) {
    let ctrl = ctrl.clone();
    monitor.subscribe(
        &[handler(move |ev: CurrentEvent| {
            let ctrl = ctrl.clone();
            async move {
                ctrl.lock().await.on_current(ev);
            }
        })],
        &[sense_error_logger("current")],
    );
}

pub fn attach_receptor<D: MotorDriver + Send + 'static>(
    monitor: &mut ReceptorMonitor,
    ctrl: &SharedControl<D>,
) {
    let ctrl = ctrl.clone();
    monitor.subscribe(
        &[handler(move |ev: ReceptorEvent| {
            let ctrl = ctrl.clone();
            async move {
                ctrl.lock().await.on_receptor(ev);
            }
        })],
        &[sense_error_logger("receptor")],
    );
}

pub fn attach_commands<D: MotorDriver + Send + 'static>(
    receiver: &CommandReceiver,
    ctrl: &SharedControl<D>,
) {
    let ctrl = ctrl.clone();
    receiver.subscribe(
        &[handler(move |ev: CommandEvent| {
            let ctrl = ctrl.clone();
            async move {
                ctrl.lock().await.on_command(ev);
            }
        })],
        &[handler(|e: CommandError| async move {
            warn!(error = %e, "rejected operator command");
        })],
    );
}

pub fn attach_uplink<D: MotorDriver + Send + 'static>(uplink: &Uplink, ctrl: &SharedControl<D>) {
    let ctrl = ctrl.clone();
    uplink.subscribe(
        &[],
        &[handler(move |ev: ServerErrorEvent| {
            let ctrl = ctrl.clone();
            async move {
                ctrl.lock().await.on_server_error(ev);
            }
        })],
    );
}
