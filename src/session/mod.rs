//! The per-connection session worker: one per connection on either side,
//! running a single task that owns the [`Transport`] and drains a task inbox
//! between reads.
//!
//! The teacher's `SmtpProtocol` ran a blocking line-at-a-time loop inside
//! one synchronous `handle_connection` future; the spec's cooperative
//! "drain tasks, probe for data, sleep" loop generalizes that into something
//! that must also accept work pushed from other tasks (the listener on
//! login, the queue processor on delivery). Per the spec's own Design Notes
//! (§9), rather than translating the non-blocking-probe-plus-sleep polling
//! loop literally, this uses the idiomatic async alternative: a dedicated
//! task select!-ing between the transport's next line and the task inbox,
//! which preserves every ordering guarantee in §5 (serial writes, in-order
//! task drain, at-least-once local delivery) without busy-waiting.

mod dispatch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::protocol::SmtpMailMessage;
use crate::sink::MailSink;
use crate::transport::Transport;

pub use dispatch::{perform_send, receive_transaction};

/// Which role this connection plays: a server accepting a client's mail, or
/// a client receiving pushes from a server (a relay session plays the client
/// role against the next hop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Work enqueued for a session's loop to run, always on the loop's own task
/// so that socket writes stay serialized. Modeled as a small closed enum
/// (matching this codebase's preference for enums like `SmtpCommandResult`
/// over boxed dynamic closures).
pub enum SessionTask {
    SendLine(String),
    SendMailMessage(SmtpMailMessage),
    Quit,
}

/// A cheaply-cloneable handle to a running session: the task inbox sender
/// plus the `connected` flag. Producers (listener, queue processor, a local
/// UI) only ever see this handle, never the `Transport` itself.
#[derive(Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionTask>,
    connected: Arc<AtomicBool>,
    pub username: Option<String>,
}

impl SessionHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Enqueues a task for the session loop to run. Errors only if the
    /// session has already torn down its receiver.
    pub fn enqueue(&self, task: SessionTask) -> bool {
        self.inbox.send(task).is_ok()
    }

    /// Abrupt termination: used when a re-login evicts a session out from
    /// under its own connection (§4.4, §9). Pushes a `Quit` task onto the
    /// inbox so the loop — which may currently be parked in `select!`
    /// awaiting a line or a task — wakes up, closes its transport, and flips
    /// `connected` itself, instead of leaking a dangling task and socket.
    /// Only sets `connected` directly if the loop has already exited (the
    /// inbox's receiver is gone), since flipping it here while the loop is
    /// still alive could let it observe "not connected" and break out
    /// without ever draining the queued `Quit` task.
    pub fn terminate_abruptly(&self) {
        if self.inbox.send(SessionTask::Quit).is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
    }
}

/// Runs one session's cooperative loop until `connected` becomes false. The
/// handshake (greeting/HELO/LOGIN) happens before this is called; `run` only
/// drives the steady-state command dispatch.
pub struct Session {
    role: Role,
    transport: Transport,
    inbox: mpsc::UnboundedReceiver<SessionTask>,
    connected: Arc<AtomicBool>,
    sink: Arc<dyn MailSink>,
    username: Option<String>,
    /// Invoked with the username when a server-role session sees QUIT, so
    /// the listener's `username -> session` map drops its entry (§4.3, §5).
    on_departure: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Session {
    pub fn new(role: Role, transport: Transport, sink: Arc<dyn MailSink>, username: Option<String>) -> (Self, SessionHandle) {
        Self::with_departure_hook(role, transport, sink, username, None)
    }

    pub fn with_departure_hook(
        role: Role,
        transport: Transport,
        sink: Arc<dyn MailSink>,
        username: Option<String>,
        on_departure: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let handle = SessionHandle {
            inbox: tx,
            connected: connected.clone(),
            username: username.clone(),
        };
        let session = Self {
            role,
            transport,
            inbox: rx,
            connected,
            sink,
            username,
            on_departure,
        };
        (session, handle)
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Drains and executes every task currently queued, in enqueue order,
    /// matching the "snapshot-and-clear each tick" semantics from §4.3.
    async fn drain_tasks(&mut self) -> Result<()> {
        while let Ok(task) = self.inbox.try_recv() {
            self.run_task(task).await?;
            if !self.connected.load(Ordering::SeqCst) {
                break;
            }
        }
        Ok(())
    }

    async fn run_task(&mut self, task: SessionTask) -> Result<()> {
        match task {
            SessionTask::SendLine(line) => {
                self.transport.send_line(&line).await?;
            }
            SessionTask::SendMailMessage(msg) => {
                if let Err(e) = perform_send(&mut self.transport, &msg).await {
                    log::warn!("failed to push mail to session: {e:#}");
                }
            }
            SessionTask::Quit => {
                match self.role {
                    // A server-role session owns the peer's connection and
                    // is the one closing it, so it sends the 221 goodbye
                    // directly (§4.3/§4.4), whether in response to a QUIT it
                    // just received or because it's being shut down/evicted.
                    Role::Server => {
                        let _ = self
                            .transport
                            .send_line(&format!(
                                "{} {} Service closing transmission channel",
                                crate::protocol::CODE_CLOSING,
                                self.transport.local_addr().ip()
                            ))
                            .await;
                    }
                    // A client-role session is the one hanging up on a
                    // server, so it must send the literal command and give
                    // the server a chance to reply, per §4.3/§6's
                    // `C: QUIT` / `S: 221 ...` exchange.
                    Role::Client => {
                        let _ = self.transport.send_line("QUIT").await;
                        let _ = tokio::time::timeout(
                            std::time::Duration::from_millis(500),
                            self.transport.read_line(),
                        )
                        .await;
                    }
                }
                self.transport.close().await;
                self.connected.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// The steady-state loop: drain tasks, then race the next inbound line
    /// against the next enqueued task, dispatching whichever arrives.
    pub async fn run(mut self) {
        info!("session loop starting ({:?})", self.role);
        loop {
            if let Err(e) = self.drain_tasks().await {
                debug!("task execution failed: {e:#}");
            }
            if !self.connected.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                line = self.transport.read_line() => {
                    match line {
                        Ok(line) => {
                            if let Err(e) = self.dispatch_line(&line).await {
                                debug!("dispatch error: {e:#}");
                            }
                        }
                        Err(_) => {
                            self.sink.on_disconnect();
                            if let Some(username) = &self.username {
                                self.sink.on_user_disconnect(username);
                                if let Some(hook) = &self.on_departure {
                                    hook(username);
                                }
                            }
                            self.connected.store(false, Ordering::SeqCst);
                        }
                    }
                }
                task = self.inbox.recv() => {
                    match task {
                        Some(task) => {
                            if let Err(e) = self.run_task(task).await {
                                debug!("task execution failed: {e:#}");
                            }
                        }
                        None => {
                            // All handles dropped; nothing left to keep this session alive for.
                            self.connected.store(false, Ordering::SeqCst);
                        }
                    }
                }
            }

            if !self.connected.load(Ordering::SeqCst) {
                break;
            }
        }
        info!("session loop exiting ({:?})", self.role);
    }

    async fn dispatch_line(&mut self, line: &str) -> Result<()> {
        dispatch::dispatch_line(
            &mut self.transport,
            &self.sink,
            &self.connected,
            &self.username,
            &self.on_departure,
            line,
        )
        .await
    }
}
