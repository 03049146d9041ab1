pub mod command;
pub mod event;
pub mod mode;
pub mod telemetry;

pub use command::{Command, CommandError, Direction};
pub use mode::{AutoState, Mode};
pub use telemetry::{SharedTelemetry, Telemetry};
