//! Telemetry uplink to the coordination server.
//!
//! Session lifecycle: register the rover, then register a fresh session id
//! (up to three attempts), then push the whole telemetry record once a
//! second. Errors travel on the event bus so the control system can decide
//! between resuming the push loop and re-registering from scratch.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use verne_bus::{EventSource, Handler};
use verne_proto::event::{ServerErrorEvent, ServerErrorKind, SessionEvent};
use verne_proto::SharedTelemetry;

const SESSION_ID_LENGTH: usize = 30;
const REGISTER_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub enable: bool,
    pub address: String,
    pub port: u16,
    pub update_interval_s: f64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self { enable: true, address: "127.0.0.1".into(), port: 80, update_interval_s: 1.0 }
    }
}

pub struct Uplink {
    base_url: String,
    rover_id: String,
    rover_addr: String,
    update_interval: Duration,
    client: reqwest::Client,
    telemetry: SharedTelemetry,
    session_id: Mutex<Option<String>>,
    // Push-loop gate: `running` is the loop's stop request flag, `exited`
    // guards against two loops racing between a stop and the next start.
    running: AtomicBool,
    exited: AtomicBool,
    events: Mutex<EventSource<SessionEvent, ServerErrorEvent>>,
}

impl Uplink {
    pub fn new(cfg: &UplinkConfig, rover_id: String, telemetry: SharedTelemetry) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            base_url: format!("http://{}:{}/", cfg.address, cfg.port),
            rover_id,
            rover_addr: find_local_addr(),
            update_interval: Duration::from_secs_f64(cfg.update_interval_s),
            client,
            telemetry,
            session_id: Mutex::new(None),
            running: AtomicBool::new(false),
            exited: AtomicBool::new(true),
            events: Mutex::new(EventSource::new()),
        })
    }

    pub fn subscribe(&self, notify: &[Handler<SessionEvent>], error: &[Handler<ServerErrorEvent>]) {
        self.events.lock().unwrap().subscribe(notify, error);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    /// Registers the rover and a new session, then optionally starts the
    /// telemetry push loop. Any running push loop is stopped first so its
    /// updates cannot carry the old session id.
    pub async fn initialize_session(self: Arc<Self>, start_update_loop: bool) {
        self.stop_update_loop();
        let was_running = self.is_running();

        if let Err(e) = self.register_rover().await {
            warn!(error = %e, "rover registration failed");
            self.raise_error(ServerErrorKind::Connection, was_running);
            return;
        }

        let mut registered = None;
        for attempt in 1..=REGISTER_ATTEMPTS {
            let candidate = self.define_new_session();
            match self.register_session(&candidate).await {
                Ok(200) => {
                    registered = Some(candidate);
                    break;
                }
                Ok(status) => {
                    debug!(status, attempt, "session registration rejected");
                }
                Err(e) => {
                    warn!(error = %e, "session registration failed");
                    self.raise_error(ServerErrorKind::Connection, was_running);
                    return;
                }
            }
        }
        let Some(session_id) = registered else {
            self.raise_error(ServerErrorKind::SessionRegister, was_running);
            return;
        };

        if let Err(e) = self.update_rover(&session_id).await {
            warn!(error = %e, "rover update failed");
            self.raise_error(ServerErrorKind::Connection, was_running);
            return;
        }

        info!(session_id, "session registered");
        self.events.lock().unwrap().raise_event(SessionEvent { session_id });
        if start_update_loop {
            self.run_update_loop().await;
        }
    }

    /// Periodic telemetry push. Single-flight: a second call while a loop
    /// is running (or still winding down after a stop) returns immediately.
    pub async fn run_update_loop(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.exited.load(Ordering::SeqCst) {
            // The previous loop saw its stop flag cleared again before it
            // could wind down; let it keep going instead.
            return;
        }
        self.exited.store(false, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match self.update_session().await {
                Ok(200) => {}
                Ok(status) => {
                    debug!(status, "session update rejected");
                    self.raise_error(ServerErrorKind::SessionUpdate, true);
                }
                Err(e) => {
                    warn!(error = %e, "session update failed");
                    self.raise_error(ServerErrorKind::Connection, true);
                    break;
                }
            }
            tokio::time::sleep(self.update_interval).await;
        }

        self.running.store(false, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
    }

    pub fn stop_update_loop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // ----- Server requests -----

    async fn register_rover(&self) -> Result<u16> {
        let msg = json!({ "rover_id": self.rover_id, "address": self.rover_addr });
        let ans = self
            .client
            .post(format!("{}api/rover/", self.base_url))
            .json(&msg)
            .send()
            .await?;
        let status = ans.status().as_u16();
        info!(status, "sent rover registration");
        Ok(status)
    }

    async fn register_session(&self, session_id: &str) -> Result<u16> {
        let msg = json!({ "session_id": session_id, "rover_id": self.rover_id });
        let ans = self
            .client
            .post(format!("{}api/session/", self.base_url))
            .json(&msg)
            .send()
            .await?;
        let status = ans.status().as_u16();
        info!(status, "sent session registration");
        Ok(status)
    }

    async fn update_rover(&self, session_id: &str) -> Result<u16> {
        let msg = json!({
            "rover_id": self.rover_id,
            "last_session": session_id,
            "address": self.rover_addr,
        });
        let ans = self
            .client
            .put(format!("{}api/rover/{}/", self.base_url, self.rover_id))
            .json(&msg)
            .send()
            .await?;
        Ok(ans.status().as_u16())
    }

    async fn update_session(&self) -> Result<u16> {
        let Some(session_id) = self.session_id() else {
            anyhow::bail!("no session registered");
        };
        let snapshot = {
            let mut t = self.telemetry.lock().unwrap();
            t.ts_unix_ms =
                Some((time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64);
            t.clone()
        };
        let ans = self
            .client
            .put(format!("{}api/session/{}/", self.base_url, session_id))
            .json(&snapshot)
            .send()
            .await?;
        Ok(ans.status().as_u16())
    }

    /// Generates a fresh session id and stamps it (plus the rover id) into
    /// the telemetry record so the very first push already carries both.
    fn define_new_session(&self) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LENGTH)
            .map(char::from)
            .collect();
        *self.session_id.lock().unwrap() = Some(id.clone());
        let mut t = self.telemetry.lock().unwrap();
        t.session_id = Some(id.clone());
        t.rover_id = Some(self.rover_id.clone());
        id
    }

    fn raise_error(&self, kind: ServerErrorKind, was_running: bool) {
        self.events.lock().unwrap().raise_error(ServerErrorEvent { kind, was_running });
    }
}

/// Best local address for reaching the server, discovered by the connected
/// UDP socket trick. Nothing is actually sent.
fn find_local_addr() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_thirty_alphanumerics_and_land_in_telemetry() {
        let telemetry = verne_proto::telemetry::shared();
        let uplink = Uplink::new(&UplinkConfig::default(), "verne-1".into(), telemetry.clone())
            .unwrap();
        let id = uplink.define_new_session();
        assert_eq!(id.len(), SESSION_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        let t = telemetry.lock().unwrap();
        assert_eq!(t.session_id.as_deref(), Some(id.as_str()));
        assert_eq!(t.rover_id.as_deref(), Some("verne-1"));
        // Consecutive ids must differ.
        drop(t);
        assert_ne!(uplink.define_new_session(), id);
    }

    #[test]
    fn local_addr_discovery_always_yields_an_ip() {
        let addr = find_local_addr();
        assert!(addr.parse::<std::net::IpAddr>().is_ok());
    }
}
