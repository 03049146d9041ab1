use anyhow::Result;

use crate::control::ControlConfig;

pub fn check_thresholds(cfg: &ControlConfig) -> Result<()> {
    anyhow::ensure!(
        cfg.rssi_giveup_dbm < cfg.rssi_follow_dbm && cfg.rssi_follow_dbm < cfg.rssi_stop_dbm,
        "control rssi thresholds must be ordered giveup < follow < stop"
    );
    anyhow::ensure!(
        cfg.battery_saver_pct > 0.0 && cfg.battery_saver_pct < 100.0,
        "control.battery_saver_pct out of range"
    );
    anyhow::ensure!(cfg.current_protection_a > 0.0, "control.current_protection_a must be positive");
    anyhow::ensure!(cfg.current_recovery_s > 0.0, "control.current_recovery_s must be positive");
    anyhow::ensure!(
        cfg.turn_speed > 0.0 && cfg.turn_speed <= 1.0,
        "control.turn_speed must be in (0, 1]"
    );
    anyhow::ensure!(
        cfg.cruise_speed > 0.0 && cfg.cruise_speed <= 1.0,
        "control.cruise_speed must be in (0, 1]"
    );
    Ok(())
}
