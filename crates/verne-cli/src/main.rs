use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use std::sync::Arc;
use std::time::Duration;

use verne_ctrl::control::{ControlConfig, ControlSystem};
use verne_ctrl::{wiring, CommandConfig, CommandReceiver};
use verne_drive::{DriveConfig, SimDriver, TractionSystem};
use verne_proto::Mode;
use verne_sense::battery::{BatteryConfig, BatteryMonitor};
use verne_sense::beacon::{BeaconConfig, BeaconDetector};
use verne_sense::capability::{
    AnalogChannel, EnvironmentSource, RadioLink, SimAnalogChannel, SimEnvironment, SimRadioLink,
};
use verne_sense::current::{CurrentConfig, CurrentMonitor};
use verne_sense::environment::{EnvironmentConfig, EnvironmentMonitor};
use verne_sense::gps::{GpsMonitor, NmeaSource};
use verne_sense::receptor::{ReceptorConfig, ReceptorMonitor};
use verne_sense::doctor as sense_doctor;
use verne_uplink::{Uplink, UplinkConfig};

#[derive(Debug, Parser)]
#[command(name = "verne", version, about = "Project Verne - beacon-following rover control")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration without touching any hardware.
    Doctor,
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    rover: RoverCfg,
    #[serde(default)]
    server: UplinkConfig,
    #[serde(default)]
    command: CommandConfig,
    #[serde(default)]
    beacon: BeaconCfg,
    #[serde(default)]
    gnss: GnssCfg,
    #[serde(default)]
    battery: BatteryCfg,
    #[serde(default)]
    current: CurrentCfg,
    #[serde(default)]
    radio: RadioCfg,
    #[serde(default)]
    environment: EnvironmentCfg,
    #[serde(default)]
    control: ControlConfig,
    #[serde(default)]
    drive: DriveConfig,
}

#[derive(Debug, serde::Deserialize)]
struct RoverCfg {
    id: String,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct BeaconCfg {
    source: String,
    sim_level_v: f64,
    calibration: BeaconConfig,
}

impl Default for BeaconCfg {
    fn default() -> Self {
        Self { source: "sim".into(), sim_level_v: 1.17, calibration: BeaconConfig::default() }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct GnssCfg {
    enable: bool,
    source: String,
    device: Option<String>,
    baud: u32,
    file: Option<String>,
}

impl Default for GnssCfg {
    fn default() -> Self {
        Self { enable: false, source: "nmea-serial".into(), device: None, baud: 9600, file: None }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct BatteryCfg {
    source: String,
    sim_level_v: f64,
    calibration: BatteryConfig,
}

impl Default for BatteryCfg {
    fn default() -> Self {
        Self { source: "sim".into(), sim_level_v: 3.7, calibration: BatteryConfig::default() }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct CurrentCfg {
    source: String,
    sim_level_v: f64,
    calibration: CurrentConfig,
}

impl Default for CurrentCfg {
    fn default() -> Self {
        Self { source: "sim".into(), sim_level_v: 2.5, calibration: CurrentConfig::default() }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct RadioCfg {
    source: String,
    sim_rssi_dbm: i32,
    poll: ReceptorConfig,
}

impl Default for RadioCfg {
    fn default() -> Self {
        Self { source: "sim".into(), sim_rssi_dbm: -90, poll: ReceptorConfig::default() }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct EnvironmentCfg {
    source: String,
    poll: EnvironmentConfig,
}

impl Default for EnvironmentCfg {
    fn default() -> Self {
        Self { source: "sim".into(), poll: EnvironmentConfig::default() }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(!cfg.rover.id.is_empty(), "rover.id missing");
    sense_doctor::check_beacon_calibration(&cfg.beacon.calibration)?;
    sense_doctor::check_battery_calibration(&cfg.battery.calibration)?;
    sense_doctor::check_current_calibration(&cfg.current.calibration)?;
    verne_ctrl::doctor::check_thresholds(&cfg.control)?;

    analog_channel("beacon", &cfg.beacon.source, cfg.beacon.sim_level_v)?;
    analog_channel("battery", &cfg.battery.source, cfg.battery.sim_level_v)?;
    analog_channel("current", &cfg.current.source, cfg.current.sim_level_v)?;
    radio_link(&cfg.radio)?;
    environment_source(&cfg.environment)?;

    if cfg.gnss.enable {
        match cfg.gnss.source.as_str() {
            "nmea-serial" => {
                anyhow::ensure!(
                    cfg.gnss.device.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                    "gnss.device missing"
                );
                anyhow::ensure!(cfg.gnss.baud > 0, "gnss.baud invalid");
            }
            "nmea-file" => {
                anyhow::ensure!(
                    cfg.gnss.file.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                    "gnss.file missing"
                );
            }
            other => anyhow::bail!("unknown gnss.source: {}", other),
        }
    }

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!(rover_id = %cfg.rover.id, "run: starting");

    let telemetry = verne_proto::telemetry::shared();

    let uplink = if cfg.server.enable {
        Some(Arc::new(Uplink::new(&cfg.server, cfg.rover.id.clone(), telemetry.clone())?))
    } else {
        None
    };

    let traction = TractionSystem::new(SimDriver::new(), cfg.drive.clone());
    let ctrl =
        ControlSystem::new(cfg.control.clone(), traction, telemetry.clone(), uplink.clone());

    // Sensor systems: subscribe first, then hand each one to the runtime.
    let mut beacon = BeaconDetector::new(
        cfg.beacon.calibration.clone(),
        analog_channel("beacon", &cfg.beacon.source, cfg.beacon.sim_level_v)?,
    );
    wiring::attach_beacon(&mut beacon, &ctrl);
    let beacon = Arc::new(beacon);
    tokio::spawn(beacon.clone().run());

    let mut battery = BatteryMonitor::new(
        cfg.battery.calibration.clone(),
        analog_channel("battery", &cfg.battery.source, cfg.battery.sim_level_v)?,
        telemetry.clone(),
    );
    wiring::attach_battery(&mut battery, &ctrl);
    let battery = Arc::new(battery);
    tokio::spawn(battery.clone().run());

    let mut current = CurrentMonitor::new(
        cfg.current.calibration.clone(),
        analog_channel("current", &cfg.current.source, cfg.current.sim_level_v)?,
        telemetry.clone(),
    );
    wiring::attach_current(&mut current, &ctrl);
    let current = Arc::new(current);
    tokio::spawn(current.clone().run());

    let mut receptor =
        ReceptorMonitor::new(cfg.radio.poll.clone(), radio_link(&cfg.radio)?, telemetry.clone());
    wiring::attach_receptor(&mut receptor, &ctrl);
    let receptor = Arc::new(receptor);
    tokio::spawn(receptor.clone().run());

    let mut environment = EnvironmentMonitor::new(
        cfg.environment.poll.clone(),
        environment_source(&cfg.environment)?,
        telemetry.clone(),
    );
    environment.subscribe(&[], &[wiring::sense_error_logger("environment")]);
    let environment = Arc::new(environment);
    tokio::spawn(environment.clone().run());

    let gps = if cfg.gnss.enable {
        let source = match cfg.gnss.source.as_str() {
            "nmea-serial" => NmeaSource::serial(
                cfg.gnss.device.as_ref().context("gnss.device missing")?,
                cfg.gnss.baud,
            )?,
            "nmea-file" => NmeaSource::file(cfg.gnss.file.as_ref().context("gnss.file missing")?)?,
            other => anyhow::bail!("unknown gnss.source: {}", other),
        };
        let mut gps = GpsMonitor::new(source, telemetry.clone());
        gps.subscribe(&[], &[wiring::sense_error_logger("gps")]);
        let gps = Arc::new(gps);
        tokio::spawn(gps.clone().run());
        Some(gps)
    } else {
        None
    };

    let commands = Arc::new(CommandReceiver::new(cfg.command.clone()));
    wiring::attach_commands(&commands, &ctrl);
    tokio::spawn(commands.clone().run());

    if let Some(uplink) = &uplink {
        wiring::attach_uplink(uplink, &ctrl);
        tokio::spawn(uplink.clone().initialize_session(true));
    }

    ctrl.lock().await.change_mode(Mode::Automatic);

    // Periodic telemetry trace, the bench replacement for a dashboard.
    {
        let telemetry = telemetry.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let snapshot = telemetry.lock().unwrap().clone();
                debug!(?snapshot, "telemetry");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
    info!("run: shutting down");

    beacon.stop();
    battery.stop();
    current.stop();
    receptor.stop();
    environment.stop();
    if let Some(gps) = &gps {
        gps.stop();
    }
    commands.stop();
    if let Some(uplink) = &uplink {
        uplink.stop_update_loop();
    }
    ctrl.lock().await.change_mode(Mode::Idle);
    Ok(())
}

// ----- Capability source selection -----

fn analog_channel(what: &str, source: &str, sim_level_v: f64) -> Result<Box<dyn AnalogChannel>> {
    match source {
        "sim" => Ok(Box::new(SimAnalogChannel::new(sim_level_v))),
        other => anyhow::bail!("unknown {}.source: {} (register drivers live out of tree)", what, other),
    }
}

fn radio_link(cfg: &RadioCfg) -> Result<Box<dyn RadioLink>> {
    match cfg.source.as_str() {
        "sim" => Ok(Box::new(SimRadioLink::new(cfg.sim_rssi_dbm))),
        other => anyhow::bail!("unknown radio.source: {}", other),
    }
}

fn environment_source(cfg: &EnvironmentCfg) -> Result<Box<dyn EnvironmentSource>> {
    match cfg.source.as_str() {
        "sim" => Ok(Box::new(SimEnvironment::default())),
        other => anyhow::bail!("unknown environment.source: {}", other),
    }
}
