//! Mode state machine and operator command intake.
//!
//! The control system is the only writer of the rover's operating mode and
//! the only caller of the traction system. Every sensor, command and uplink
//! event funnels into one `on_*` method behind a single async mutex, so
//! transitions are serialized no matter which sampling loop fired.

pub mod command;
pub mod control;
pub mod doctor;
pub mod wiring;

pub use command::{CommandConfig, CommandReceiver};
pub use control::{ControlConfig, ControlSystem, SharedControl};
