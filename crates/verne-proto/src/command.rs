use serde::Deserialize;
use thiserror::Error;

use crate::mode::Mode;

/// Manual driving direction requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forwards,
    Backwards,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FORWARDS" => Some(Direction::Forwards),
            "BACKWARDS" => Some(Direction::Backwards),
            "LEFT" => Some(Direction::Left),
            "RIGHT" => Some(Direction::Right),
            "STOP" => Some(Direction::Stop),
            _ => None,
        }
    }
}

/// Operator command, decoded at the channel boundary. The wire format is
/// `{"command": <name>, "param"?: <string>}`; anything outside the closed
/// set below is a decode error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetDirection(Direction),
    SelectMode(Mode),
    NewSession,
}

#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("invalid json: {0}")]
    Json(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing param for {0}")]
    MissingParam(&'static str),
    #[error("invalid param for {0}: {1}")]
    BadParam(&'static str, String),
}

#[derive(Debug, Deserialize)]
struct CommandMsg {
    command: String,
    #[serde(default)]
    param: Option<String>,
}

impl Command {
    pub fn from_json(raw: &[u8]) -> Result<Self, CommandError> {
        let msg: CommandMsg =
            serde_json::from_slice(raw).map_err(|e| CommandError::Json(e.to_string()))?;
        match msg.command.as_str() {
            "SET_DIRECTION" => {
                let param = msg.param.ok_or(CommandError::MissingParam("SET_DIRECTION"))?;
                let dir = Direction::from_name(&param)
                    .ok_or(CommandError::BadParam("SET_DIRECTION", param))?;
                Ok(Command::SetDirection(dir))
            }
            "SELECT_MODE" => {
                let param = msg.param.ok_or(CommandError::MissingParam("SELECT_MODE"))?;
                let mode = Mode::from_name(&param)
                    .ok_or(CommandError::BadParam("SELECT_MODE", param))?;
                Ok(Command::SelectMode(mode))
            }
            "NEW_SESSION" => Ok(Command::NewSession),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_direction_command() {
        let cmd = Command::from_json(br#"{"command":"SET_DIRECTION","param":"LEFT"}"#).unwrap();
        assert_eq!(cmd, Command::SetDirection(Direction::Left));
    }

    #[test]
    fn decodes_mode_command() {
        let cmd = Command::from_json(br#"{"command":"SELECT_MODE","param":"AUTOMATIC"}"#).unwrap();
        assert_eq!(cmd, Command::SelectMode(Mode::Automatic));
    }

    #[test]
    fn decodes_session_command_without_param() {
        let cmd = Command::from_json(br#"{"command":"NEW_SESSION"}"#).unwrap();
        assert_eq!(cmd, Command::NewSession);
    }

    #[test]
    fn rejects_unknown_command() {
        let err = Command::from_json(br#"{"command":"SELF_DESTRUCT"}"#).unwrap_err();
        assert!(matches!(err, CommandError::UnknownCommand(_)));
    }

    #[test]
    fn rejects_missing_param() {
        let err = Command::from_json(br#"{"command":"SET_DIRECTION"}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingParam("SET_DIRECTION")));
    }

    #[test]
    fn rejects_bad_param() {
        let err = Command::from_json(br#"{"command":"SET_DIRECTION","param":"UP"}"#).unwrap_err();
        assert!(matches!(err, CommandError::BadParam("SET_DIRECTION", _)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = Command::from_json(b"not json at all").unwrap_err();
        assert!(matches!(err, CommandError::Json(_)));
    }
}
