//! The accept loop: binds the configured port, runs the greeting/HELO/LOGIN
//! handshake for each accepted socket, and owns the `username -> session` map
//! (§4.4).

pub mod dispatcher;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use crate::auth::AuthStore;
use crate::protocol::{SmtpMailMessage, CODE_GREETING, CODE_OK};
use crate::queue::IncomingEntry;
use crate::session::{Role, Session, SessionHandle, SessionTask};
use crate::transport::Transport;

pub use dispatcher::Dispatcher;

/// Shared session registry: `username -> SessionHandle`, mutated only by the
/// listener (§5), read by the queue processor and by login eviction.
pub type SessionMap = Arc<StdMutex<HashMap<String, SessionHandle>>>;

pub struct Listener {
    bind_addr: SocketAddr,
    auth: Arc<AuthStore>,
    security_enabled: bool,
    sessions: SessionMap,
    dispatcher: Arc<Dispatcher>,
    listening: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Listener {
    pub fn new(
        bind_addr: SocketAddr,
        auth: Arc<AuthStore>,
        security_enabled: bool,
        sessions: SessionMap,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            bind_addr,
            auth,
            security_enabled,
            sessions,
            dispatcher,
            listening: Arc::new(AtomicBool::new(true)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// A flag producers can clear (and then notify) to stop the accept loop
    /// and terminate every live session, per §4.4's shutdown rule.
    pub fn listening_flag(&self) -> Arc<AtomicBool> {
        self.listening.clone()
    }

    pub fn shutdown_notify(&self) -> Arc<Notify> {
        self.shutdown_notify.clone()
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("binding SMTP listener to {}", self.bind_addr))?;
        info!("listening for SMTP connections on {}", self.bind_addr);

        loop {
            if !self.listening.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };

                    let auth = self.auth.clone();
                    let sessions = self.sessions.clone();
                    let dispatcher = self.dispatcher.clone();
                    let security_enabled = self.security_enabled;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, auth, security_enabled, sessions, dispatcher).await {
                            warn!("connection from {peer} ended with error: {e:#}");
                        }
                    });
                }
                _ = self.shutdown_notify.notified() => {
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Enqueues a graceful termination task for every live session, then
    /// clears the map (§4.4).
    fn shutdown(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        for (username, handle) in sessions.drain() {
            handle.enqueue(SessionTask::Quit);
            info!("shutdown: terminating session for {username}");
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    auth: Arc<AuthStore>,
    security_enabled: bool,
    sessions: SessionMap,
    dispatcher: Arc<Dispatcher>,
) -> Result<()> {
    let mut transport = Transport::new(stream)?;
    let local_host = transport.local_addr().ip().to_string();

    transport
        .send_line(&format!("{CODE_GREETING} {local_host} ESMTP"))
        .await?;

    let helo = transport.read_line().await?;
    let remote_host = helo
        .strip_prefix("HELO ")
        .or_else(|| helo.strip_prefix("helo "))
        .unwrap_or(&peer.ip().to_string())
        .trim()
        .to_string();
    transport
        .send_line(&format!("{CODE_OK} Hello {remote_host}, I am glad to meet you"))
        .await?;

    let username = transport.read_line().await?;
    // Password lines are never logged verbatim; only a masked placeholder is.
    let password = transport.read_line().await?;
    debug_masked_password(&password);

    let accepted = if security_enabled {
        auth.is_valid_login(&username, &password)
    } else {
        true
    };

    if !accepted {
        transport.send_line("DECLINED").await?;
        transport.close().await;
        info!("login declined for {username:?} from {peer}");
        return Ok(());
    }
    transport.send_line("ACCEPTED").await?;
    info!("login accepted for {username} from {peer}");

    let sessions_for_departure = sessions.clone();
    let departed_username = username.clone();
    let on_departure: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |name: &str| {
        sessions_for_departure.lock().unwrap().remove(name);
        let _ = &departed_username;
    });

    let (session, handle) = Session::with_departure_hook(
        Role::Server,
        transport,
        dispatcher,
        Some(username.clone()),
        Some(on_departure),
    );

    // A re-login evicts the prior session for this username (§4.4, §9).
    let previous = sessions.lock().unwrap().insert(username.clone(), handle);
    if let Some(previous) = previous {
        previous.terminate_abruptly();
    }

    session.run().await;
    Ok(())
}

/// The protocol requires the raw password line to cross the wire; this is
/// the one place it's read. We deliberately never pass it to `log`/`debug!`
/// verbatim, mirroring the masked-log callback called for in the transport
/// contract.
fn debug_masked_password(password: &str) {
    log::debug!("<- {}", "*".repeat(password.len()));
}

/// Convenience constructor bundling dispatcher + queues, used by the crate
/// root when wiring everything together.
pub fn new_queues() -> (
    Arc<Mutex<VecDeque<IncomingEntry>>>,
    Arc<Mutex<VecDeque<SmtpMailMessage>>>,
) {
    (
        Arc::new(Mutex::new(VecDeque::new())),
        Arc::new(Mutex::new(VecDeque::new())),
    )
}
