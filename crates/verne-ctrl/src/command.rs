//! Operator command intake: one UDP datagram per command, decoded at the
//! socket boundary so only well-formed commands ever reach the control
//! system. Bound to localhost, the operator link terminates in a local
//! relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};
use verne_bus::{EventSource, Handler};
use verne_proto::event::CommandEvent;
use verne_proto::{Command, CommandError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub port: u16,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

pub struct CommandReceiver {
    cfg: CommandConfig,
    events: Mutex<EventSource<CommandEvent, CommandError>>,
    running: AtomicBool,
}

impl CommandReceiver {
    pub fn new(cfg: CommandConfig) -> Self {
        Self {
            cfg,
            events: Mutex::new(EventSource::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, notify: &[Handler<CommandEvent>], error: &[Handler<CommandError>]) {
        self.events.lock().unwrap().subscribe(notify, error);
    }

    /// Receive loop. Undecodable datagrams are reported on the error
    /// channel and dropped; the loop only ends on `stop` or a bind failure.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let socket = match UdpSocket::bind(("127.0.0.1", self.cfg.port)).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, port = self.cfg.port, "command socket bind failed");
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };
        let mut buf = [0u8; 1024];
        while self.running.load(Ordering::SeqCst) {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "command socket read failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            };
            match Command::from_json(&buf[..len]) {
                Ok(command) => {
                    debug!(?command, %peer, "command received");
                    self.events.lock().unwrap().raise_event(CommandEvent { command });
                }
                Err(e) => {
                    warn!(error = %e, %peer, "undecodable command datagram");
                    self.events.lock().unwrap().raise_error(e);
                }
            }
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use verne_bus::handler;
    use verne_proto::Direction;

    #[test]
    fn default_port_does_not_collide_with_the_uplink() {
        assert_ne!(CommandConfig::default().port, verne_uplink::UplinkConfig::default().port);
    }

    #[tokio::test]
    async fn decodes_datagrams_and_reports_garbage() {
        let receiver = Arc::new(CommandReceiver::new(CommandConfig { port: 47231 }));
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        receiver.subscribe(
            &[handler(move |e: CommandEvent| {
                let tx = cmd_tx.clone();
                async move {
                    let _ = tx.send(e.command);
                }
            })],
            &[handler(move |e: CommandError| {
                let tx = err_tx.clone();
                async move {
                    let _ = tx.send(e);
                }
            })],
        );
        tokio::spawn(receiver.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(br#"{"command":"SET_DIRECTION","param":"LEFT"}"#, "127.0.0.1:47231")
            .await
            .unwrap();
        sender.send_to(b"garbage", "127.0.0.1:47231").await.unwrap();
        sender
            .send_to(br#"{"command":"NEW_SESSION"}"#, "127.0.0.1:47231")
            .await
            .unwrap();

        assert_eq!(cmd_rx.recv().await.unwrap(), Command::SetDirection(Direction::Left));
        assert_eq!(cmd_rx.recv().await.unwrap(), Command::NewSession);
        assert!(matches!(err_rx.recv().await.unwrap(), CommandError::Json(_)));
        receiver.stop();
    }
}
