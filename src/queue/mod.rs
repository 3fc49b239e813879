//! The dual-queue routing subsystem (§4.5): a bounded-per-tick incoming
//! (local-delivery) queue and outgoing (relay) queue, a cooperative
//! processor that drains both, and an explicit persistence record format.

mod persist;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};

use crate::protocol::{MailMessage, SmtpMailMessage};
use crate::session::{Role, Session, SessionHandle, SessionTask};
use crate::sink::{FileLogSink, LoggingSink, MailSink};
use crate::transport::Transport;

pub use persist::{load_incoming, load_outgoing, save_incoming, save_outgoing};

/// At most this many entries are drained from a single queue per tick (§4.5, §8).
pub const DRAIN_PER_TICK: usize = 10;
const TICK_INTERVAL: Duration = Duration::from_millis(250);
const RELAY_PORT: u16 = 25;
const RELAY_USERNAME: &str = "server";
const RELAY_PASSWORD: &str = "server";
/// Grace period after handing a relay session its message, before asking it to quit.
const RELAY_GRACE: Duration = Duration::from_millis(500);

/// One entry in the local-delivery queue: the recipient's local username and
/// the plain `MailMessage` to hand to their session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEntry {
    pub username: String,
    pub message: MailMessage,
}

/// Runs the cooperative queue-drain loop described in §4.5. Holds the two
/// queues and the live `username -> session` map shared with the listener.
pub struct QueueProcessor {
    incoming: Arc<Mutex<VecDeque<IncomingEntry>>>,
    outgoing: Arc<Mutex<VecDeque<SmtpMailMessage>>>,
    sessions: Arc<std::sync::Mutex<HashMap<String, SessionHandle>>>,
    log_sink: FileLogSink,
    incoming_path: PathBuf,
    outgoing_path: PathBuf,
}

impl QueueProcessor {
    pub fn new(
        incoming: Arc<Mutex<VecDeque<IncomingEntry>>>,
        outgoing: Arc<Mutex<VecDeque<SmtpMailMessage>>>,
        sessions: Arc<std::sync::Mutex<HashMap<String, SessionHandle>>>,
        log_root: impl Into<PathBuf>,
        incoming_path: impl Into<PathBuf>,
        outgoing_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            incoming,
            outgoing,
            sessions,
            log_sink: FileLogSink::new(log_root),
            incoming_path: incoming_path.into(),
            outgoing_path: outgoing_path.into(),
        }
    }

    /// Restores both queues from disk, per §4.5's "read back if present" rule.
    pub async fn restore(&self) -> Result<()> {
        if let Some(entries) = load_incoming(&self.incoming_path)? {
            *self.incoming.lock().await = entries;
        }
        if let Some(entries) = load_outgoing(&self.outgoing_path)? {
            *self.outgoing.lock().await = entries;
        }
        Ok(())
    }

    /// Dumps both queues to disk if non-empty, per §4.5.
    pub async fn persist(&self) -> Result<()> {
        let incoming = self.incoming.lock().await;
        if !incoming.is_empty() {
            save_incoming(&self.incoming_path, &incoming)?;
        }
        drop(incoming);

        let outgoing = self.outgoing.lock().await;
        if !outgoing.is_empty() {
            save_outgoing(&self.outgoing_path, &outgoing)?;
        }
        Ok(())
    }

    /// Runs the tick loop until `running` flips false. Intended to be spawned
    /// as its own task alongside the listener.
    pub async fn run(self: Arc<Self>, running: Arc<std::sync::atomic::AtomicBool>) {
        let mut ticker = interval(TICK_INTERVAL);
        while running.load(std::sync::atomic::Ordering::SeqCst) {
            ticker.tick().await;
            self.drain_incoming().await;
            self.drain_outgoing().await;
        }
    }

    async fn drain_incoming(&self) {
        let mut batch = Vec::new();
        {
            let mut queue = self.incoming.lock().await;
            for _ in 0..DRAIN_PER_TICK {
                match queue.pop_front() {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
        }

        for entry in batch {
            let handle = self.sessions.lock().unwrap().get(&entry.username).cloned();
            match handle {
                Some(handle) if handle.is_connected() => {
                    let smtp_from = entry.message.sender.clone();
                    let smtp_recipients =
                        vec![format!("{}@{}", entry.username, local_label())];
                    let msg = SmtpMailMessage::new(entry.message.clone(), smtp_from, smtp_recipients);
                    handle.enqueue(SessionTask::SendMailMessage(msg.clone()));
                    if let Err(e) = self.log_sink.write_delivery("localServer", &entry.username, &msg) {
                        warn!("failed to write delivery log for {}: {e}", entry.username);
                    }
                }
                _ => {
                    // No session for this user yet; retry next tick (§4.5, §7).
                    self.incoming.lock().await.push_back(entry);
                }
            }
        }
    }

    async fn drain_outgoing(&self) {
        let mut batch = Vec::new();
        {
            let mut queue = self.outgoing.lock().await;
            for _ in 0..DRAIN_PER_TICK {
                match queue.pop_front() {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
        }

        for message in batch {
            if let Err(e) = relay_message(&message).await {
                warn!("relay delivery failed, dropping message: {e:#}");
            }
        }
    }
}

/// Groups `message`'s remote recipients by host and opens one relay
/// connection per host, per §4.5's outbound processing rule.
async fn relay_message(message: &SmtpMailMessage) -> Result<()> {
    let mut by_host: HashMap<String, Vec<String>> = HashMap::new();
    for recipient in &message.smtp_recipients {
        if let Some((_, host)) = recipient.split_once('@') {
            by_host.entry(host.to_string()).or_default().push(recipient.clone());
        }
    }

    for (host, recipients) in by_host {
        let mut per_host = message.clone();
        per_host.smtp_recipients = recipients;
        if let Err(e) = relay_to_host(&host, &per_host).await {
            warn!("relay to {host} failed: {e:#}");
        }
    }
    Ok(())
}

async fn relay_to_host(host: &str, message: &SmtpMailMessage) -> Result<()> {
    let addr = format!("{host}:{RELAY_PORT}");
    let stream = tokio::net::TcpStream::connect(&addr).await?;
    let mut transport = Transport::new(stream)?;

    let greeting = transport.read_line().await?;
    info!("relay to {host}: {greeting}");
    transport
        .send_line(&format!("HELO {}", local_label()))
        .await?;
    transport.read_line().await?;

    transport.send_line(RELAY_USERNAME).await?;
    transport.send_line(RELAY_PASSWORD).await?;
    let auth_reply = transport.read_line().await?;
    if auth_reply.trim() != "ACCEPTED" {
        anyhow::bail!("relay login to {host} declined");
    }

    let (session, handle) = Session::new(Role::Client, transport, Arc::new(LoggingSink), None);
    let task = tokio::spawn(session.run());

    handle.enqueue(SessionTask::SendMailMessage(message.clone()));
    tokio::time::sleep(RELAY_GRACE).await;
    handle.enqueue(SessionTask::Quit);

    let _ = task.await;
    Ok(())
}

fn local_label() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn drain_incoming_redelivers_when_no_session() {
        let incoming = Arc::new(Mutex::new(VecDeque::new()));
        incoming.lock().await.push_back(IncomingEntry {
            username: "carol".into(),
            message: MailMessage::new().with_sender("alice@srv").with_subject("hi"),
        });
        let outgoing = Arc::new(Mutex::new(VecDeque::new()));
        let sessions = Arc::new(std::sync::Mutex::new(HashMap::new()));

        let dir = std::env::temp_dir().join(format!("relaymail-queue-test-{}", std::process::id()));
        let processor = QueueProcessor::new(
            incoming.clone(),
            outgoing,
            sessions,
            dir.join("logs"),
            dir.join("incoming.bin"),
            dir.join("outgoing.bin"),
        );

        processor.drain_incoming().await;
        assert_eq!(incoming.lock().await.len(), 1);
        assert_eq!(incoming.lock().await[0].username, "carol");
    }

    #[tokio::test]
    async fn drain_incoming_delivers_to_connected_session() {
        let incoming = Arc::new(Mutex::new(VecDeque::new()));
        incoming.lock().await.push_back(IncomingEntry {
            username: "bob".into(),
            message: MailMessage::new().with_sender("alice@srv").with_subject("hi"),
        });
        let outgoing = Arc::new(Mutex::new(VecDeque::new()));

        let (client, server) = tokio::io::duplex(4096);
        let _ = client;
        let _ = server;
        // A SessionHandle needs a live Session behind it; build one from a loopback pair.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let accept = listener.accept();
        let (client_stream, (server_stream, _)) = tokio::join!(connect, accept);
        let transport = Transport::new(client_stream.unwrap()).unwrap();
        let (session, handle) = Session::new(Role::Server, transport, Arc::new(LoggingSink), Some("bob".into()));
        let _task = tokio::spawn(session.run());
        drop(server_stream);

        let sessions = Arc::new(std::sync::Mutex::new(HashMap::new()));
        sessions.lock().unwrap().insert("bob".to_string(), handle);

        let dir = std::env::temp_dir().join(format!("relaymail-queue-test2-{}", std::process::id()));
        let processor = QueueProcessor::new(
            incoming.clone(),
            outgoing,
            sessions,
            dir.join("logs"),
            dir.join("incoming.bin"),
            dir.join("outgoing.bin"),
        );

        processor.drain_incoming().await;
        assert!(incoming.lock().await.is_empty());
    }

    #[tokio::test]
    async fn run_stops_when_flag_cleared() {
        let incoming = Arc::new(Mutex::new(VecDeque::new()));
        let outgoing = Arc::new(Mutex::new(VecDeque::new()));
        let sessions = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let dir = std::env::temp_dir().join(format!("relaymail-queue-test3-{}", std::process::id()));
        let processor = Arc::new(QueueProcessor::new(
            incoming,
            outgoing,
            sessions,
            dir.join("logs"),
            dir.join("incoming.bin"),
            dir.join("outgoing.bin"),
        ));

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let handle = tokio::spawn(async move { processor.run(running_clone).await });
        running.store(false, std::sync::atomic::Ordering::SeqCst);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
