//! The client driver (§2, §4 "Client driver"): establishes a session against
//! a server, runs the client side of the handshake, and exposes a small API
//! for composing/submitting mail and rendering inbound deliveries.
//!
//! Out of scope for this crate: the actual compose/inbox widgets. This
//! module provides the protocol-facing calls a GUI shell would sit on top
//! of, plus a terminal-oriented `MailSink` suitable for the CLI client.

use std::sync::Arc;

use anyhow::{bail, Result};
use log::info;
use tokio::net::TcpStream;

use crate::protocol::{MailMessage, SmtpMailMessage};
use crate::session::{perform_send, Role, Session, SessionHandle, SessionTask};
use crate::sink::{MailSink, Severity};
use crate::transport::Transport;

/// Connects to `host:port`, runs the greeting/HELO/LOGIN handshake, and
/// returns a running session handle plus its background task.
///
/// `local_label` is sent as the `HELO` argument.
pub async fn connect(
    host: &str,
    port: u16,
    local_label: &str,
    username: &str,
    password: &str,
    sink: Arc<dyn MailSink>,
) -> Result<(SessionHandle, tokio::task::JoinHandle<()>)> {
    let stream = TcpStream::connect((host, port)).await?;
    let mut transport = Transport::new(stream)?;

    let greeting = transport.read_line().await?;
    info!("server greeting: {greeting}");

    transport.send_line(&format!("HELO {local_label}")).await?;
    let helo_reply = transport.read_line().await?;
    info!("helo reply: {helo_reply}");

    transport.send_line(username).await?;
    transport.send_line(password).await?;
    let login_reply = transport.read_line().await?;
    if login_reply.trim() != "ACCEPTED" {
        bail!("login declined by server");
    }

    let (session, handle) = Session::new(Role::Client, transport, sink, Some(username.to_string()));
    let task = tokio::spawn(session.run());
    Ok((handle, task))
}

/// Submits `mail` over an already-connected session, addressed to
/// `smtp_recipients`. Queued on the session's task inbox so writes stay
/// serialized with any concurrently pushed deliveries.
pub fn submit(handle: &SessionHandle, smtp_from: String, smtp_recipients: Vec<String>, mail: MailMessage) -> bool {
    let message = SmtpMailMessage::new(mail, smtp_from, smtp_recipients);
    handle.enqueue(SessionTask::SendMailMessage(message))
}

/// Runs a full send transaction directly over a transport without going
/// through a session loop — used by short-lived relay-style submissions
/// where there's no reason to keep a background task running.
pub async fn send_once(transport: &mut Transport, message: &SmtpMailMessage) -> Result<()> {
    perform_send(transport, message).await
}

/// Requests a graceful disconnect.
pub fn quit(handle: &SessionHandle) -> bool {
    handle.enqueue(SessionTask::Quit)
}

/// A `MailSink` that renders inbound deliveries and disconnects to a
/// terminal, used by the CLI client binary.
#[derive(Clone)]
pub struct ConsoleSink;

impl MailSink for ConsoleSink {
    fn show_dialog(&self, text: &str, title: &str, severity: Severity) {
        println!("[{severity:?}] {title}: {text}");
    }

    fn log(&self, line: &str) {
        println!("{line}");
    }

    fn on_mail_received(&self, message: &SmtpMailMessage) {
        println!("--- new message ---");
        println!("From: {}", message.mail.sender);
        println!("To: {}", message.mail.to.join(", "));
        println!("Subject: {}", message.mail.subject);
        println!();
        println!("{}", message.mail.body);
        println!("--------------------");
    }

    fn on_disconnect(&self) {
        println!("disconnected from server");
    }

    fn on_user_disconnect(&self, username: &str) {
        println!("{username} disconnected");
    }
}
