use anyhow::Result;

use crate::battery::BatteryConfig;
use crate::beacon::BeaconConfig;
use crate::current::CurrentConfig;

pub fn check_beacon_calibration(cfg: &BeaconConfig) -> Result<()> {
    anyhow::ensure!(cfg.poll_hz > 0.0 && cfg.poll_hz <= 200.0, "beacon.poll_hz out of range");
    anyhow::ensure!(cfg.center_v > 0.0, "beacon.center_v must be positive");
    anyhow::ensure!(
        cfg.right_offset_v > 0.0 && cfg.left_offset_v > 0.0,
        "beacon offsets must be positive"
    );
    anyhow::ensure!(
        cfg.center_v - cfg.right_offset_v > 0.0,
        "beacon.right_offset_v swallows the whole right band"
    );
    anyhow::ensure!(
        cfg.max_expected_v > cfg.center_v + cfg.left_offset_v,
        "beacon.max_expected_v inside the left band"
    );
    anyhow::ensure!(
        cfg.min_turn_margin_v >= 0.0 && cfg.min_straight_margin_v >= 0.0,
        "beacon confidence margins must not be negative"
    );
    anyhow::ensure!(
        cfg.min_straight_margin_v < cfg.right_offset_v.min(cfg.left_offset_v),
        "beacon.min_straight_margin_v leaves no confident straight band"
    );
    Ok(())
}

pub fn check_battery_calibration(cfg: &BatteryConfig) -> Result<()> {
    anyhow::ensure!(cfg.poll_hz > 0.0, "battery.poll_hz must be positive");
    anyhow::ensure!(cfg.full_v > cfg.empty_v, "battery.full_v must exceed battery.empty_v");
    Ok(())
}

pub fn check_current_calibration(cfg: &CurrentConfig) -> Result<()> {
    anyhow::ensure!(cfg.poll_hz > 0.0, "current.poll_hz must be positive");
    anyhow::ensure!(cfg.sensitivity_v_per_a > 0.0, "current.sensitivity_v_per_a must be positive");
    anyhow::ensure!(cfg.zero_v > 0.0, "current.zero_v must be positive");
    Ok(())
}
