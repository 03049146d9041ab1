/// Rover operating mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Automatic,
    Manual,
    BatterySaver,
    CurrentProtection,
}

impl Mode {
    pub fn as_name(&self) -> &'static str {
        match self {
            Mode::Idle => "IDLE",
            Mode::Automatic => "AUTOMATIC",
            Mode::Manual => "MANUAL",
            Mode::BatterySaver => "BATTERY_SAVER",
            Mode::CurrentProtection => "CURRENT_PROTECTION",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "IDLE" => Some(Mode::Idle),
            "AUTOMATIC" => Some(Mode::Automatic),
            "MANUAL" => Some(Mode::Manual),
            "BATTERY_SAVER" => Some(Mode::BatterySaver),
            "CURRENT_PROTECTION" => Some(Mode::CurrentProtection),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_name())
    }
}

/// Sub-state within `Mode::Automatic`. Cleared outside that mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoState {
    NotFound,
    Following,
    Reached,
}

impl AutoState {
    pub fn as_name(&self) -> &'static str {
        match self {
            AutoState::NotFound => "NOT_FOUND",
            AutoState::Following => "FOLLOWING",
            AutoState::Reached => "REACHED",
        }
    }
}

impl std::fmt::Display for AutoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_name_round_trip() {
        for mode in [
            Mode::Idle,
            Mode::Automatic,
            Mode::Manual,
            Mode::BatterySaver,
            Mode::CurrentProtection,
        ] {
            assert_eq!(Mode::from_name(mode.as_name()), Some(mode));
        }
        assert_eq!(Mode::from_name("TURBO"), None);
    }
}
