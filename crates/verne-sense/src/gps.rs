//! GPS monitor: line-oriented NMEA reader feeding the shared telemetry
//! record and the event bus. Parse failures are reported on the error
//! channel and never stop the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;
use verne_bus::{EventSource, Handler};
use verne_proto::event::{GpsEvent, LocationEvent, SatelliteInfo, SatelliteListEvent};
use verne_proto::SharedTelemetry;

use crate::SenseError;

pub enum NmeaSource {
    Serial(BufReader<SerialStream>),
    File(BufReader<File>),
}

impl NmeaSource {
    pub fn serial(dev: &str, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open gps serial {}", dev))?;
        Ok(Self::Serial(BufReader::new(port)))
    }

    pub fn file(path: &str) -> Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("open nmea file {}", path))?;
        Ok(Self::File(BufReader::new(File::from_std(f))))
    }

    async fn next_line(&mut self, buf: &mut String) -> std::io::Result<usize> {
        buf.clear();
        match self {
            NmeaSource::Serial(r) => r.read_line(buf).await,
            NmeaSource::File(r) => {
                let n = r.read_line(buf).await?;
                if n == 0 {
                    // EOF on a replay file: wait and loop from nothing.
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(n)
            }
        }
    }
}

// ----- Sentence parsing -----

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GgaData {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_m: Option<f64>,
    pub sats: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GsvData {
    pub total: u8,
    pub current: u8,
    pub satellites: Vec<SatelliteInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sentence {
    Gga(GgaData),
    Gsv(GsvData),
    Other,
}

pub(crate) fn parse_sentence(line: &str) -> Result<Sentence, SenseError> {
    if !line.starts_with('$') {
        return Err(SenseError::Nmea(format!("missing '$' start: {:?}", line)));
    }
    // Checksum suffix is not verified, only stripped.
    let body = line[1..].split('*').next().unwrap_or("");
    let parts: Vec<&str> = body.split(',').collect();
    let talker = parts[0];
    if talker.len() == 5 && talker.ends_with("GGA") {
        parse_gga(&parts)
    } else if talker.len() == 5 && talker.ends_with("GSV") {
        parse_gsv(&parts)
    } else {
        Ok(Sentence::Other)
    }
}

fn parse_gga(parts: &[&str]) -> Result<Sentence, SenseError> {
    if parts.len() < 10 {
        return Err(SenseError::Nmea(format!("truncated GGA ({} fields)", parts.len())));
    }
    // parts: [talker, time, lat, N/S, lon, E/W, quality, sats, hdop, alt, ...]
    // Exactly-zero coordinates mean "no fix yet", not a place off Ghana.
    let lat = parse_deg_min(parts[2], parts[3]).filter(|v| *v != 0.0);
    let lon = parse_deg_min(parts[4], parts[5]).filter(|v| *v != 0.0);
    let sats = parts[7].parse::<u32>().ok();
    let alt_m = parts[9].parse::<f64>().ok().filter(|v| *v != 0.0);
    Ok(Sentence::Gga(GgaData { lat, lon, alt_m, sats }))
}

fn parse_gsv(parts: &[&str]) -> Result<Sentence, SenseError> {
    if parts.len() < 4 {
        return Err(SenseError::Nmea(format!("truncated GSV ({} fields)", parts.len())));
    }
    let total: u8 = parts[1]
        .parse()
        .map_err(|_| SenseError::Nmea(format!("bad GSV total: {:?}", parts[1])))?;
    let current: u8 = parts[2]
        .parse()
        .map_err(|_| SenseError::Nmea(format!("bad GSV index: {:?}", parts[2])))?;

    // Up to four satellite blocks of (prn, elevation, azimuth, snr); any
    // field but the prn may be empty.
    let mut satellites = Vec::new();
    let mut i = 4;
    while i < parts.len().min(20) {
        let block = &parts[i..(i + 4).min(parts.len())];
        if block[0].is_empty() {
            break;
        }
        let prn: u16 = block[0]
            .parse()
            .map_err(|_| SenseError::Nmea(format!("bad GSV prn: {:?}", block[0])))?;
        let field = |idx: usize| block.get(idx).and_then(|s| s.parse::<u16>().ok());
        satellites.push(SatelliteInfo {
            prn,
            elevation_deg: field(1),
            azimuth_deg: field(2),
            snr_db: field(3),
        });
        i += 4;
    }
    Ok(Sentence::Gsv(GsvData { total, current, satellites }))
}

fn parse_deg_min(v: &str, hemi: &str) -> Option<f64> {
    // Corrupted serial bytes can decode as non-ASCII text; treat the field
    // as unset instead of slicing mid-character.
    if v.is_empty() || !v.is_ascii() {
        return None;
    }
    // lat: ddmm.mmmm, lon: dddmm.mmmm
    let dot = v.find('.')?;
    let deg_len = if dot > 4 { 3 } else { 2 };
    let deg: f64 = v[..deg_len].parse().ok()?;
    let min: f64 = v[deg_len..].parse().ok()?;
    let mut out = deg + min / 60.0;
    if hemi == "S" || hemi == "W" {
        out = -out;
    }
    Some(out)
}

/// Accumulates the multi-sentence GSV sequence: reset on sub-message 1,
/// append per sub-message, publish when current == total.
#[derive(Debug, Default)]
pub(crate) struct GsvAccumulator {
    pending: Vec<SatelliteInfo>,
}

impl GsvAccumulator {
    pub(crate) fn feed(&mut self, gsv: GsvData) -> Option<Vec<SatelliteInfo>> {
        if gsv.current == 1 {
            self.pending.clear();
        }
        self.pending.extend(gsv.satellites);
        if gsv.current == gsv.total {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ----- Monitor -----

pub struct GpsMonitor {
    source: tokio::sync::Mutex<NmeaSource>,
    telemetry: SharedTelemetry,
    events: EventSource<GpsEvent, SenseError>,
    running: AtomicBool,
}

impl GpsMonitor {
    pub fn new(source: NmeaSource, telemetry: SharedTelemetry) -> Self {
        Self {
            source: tokio::sync::Mutex::new(source),
            telemetry,
            events: EventSource::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&mut self, notify: &[Handler<GpsEvent>], error: &[Handler<SenseError>]) {
        self.events.subscribe(notify, error);
    }

    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut source = self.source.lock().await;
        let mut accum = GsvAccumulator::default();
        let mut line = String::new();
        while self.running.load(Ordering::SeqCst) {
            match source.next_line(&mut line).await {
                Ok(_) => {}
                Err(e) => {
                    // Serial hiccups and undecodable bytes are transient.
                    self.events.raise_error(SenseError::Read(e.to_string()));
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_sentence(trimmed) {
                Err(e) => self.events.raise_error(e),
                Ok(Sentence::Other) => {}
                Ok(Sentence::Gga(gga)) => self.apply_fix(gga),
                Ok(Sentence::Gsv(gsv)) => {
                    if let Some(satellites) = accum.feed(gsv) {
                        debug!(count = satellites.len(), "satellite list complete");
                        self.events.raise_event(GpsEvent::Satellites(SatelliteListEvent {
                            satellites,
                        }));
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn apply_fix(&self, gga: GgaData) {
        let snapshot = {
            let mut t = self.telemetry.lock().unwrap();
            t.latitude = gga.lat;
            t.longitude = gga.lon;
            t.altitude_m = gga.alt_m;
            t.num_satellites = gga.sats;
            t.clone()
        };
        self.events.raise_event(GpsEvent::Location(LocationEvent { snapshot }));
    }
}
