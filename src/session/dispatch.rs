//! The command dispatch table (spec §4.3) shared by both server and client
//! connections, plus the two protocol transactions every session can run:
//! receiving a pushed/submitted message, and sending one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::protocol::{
    codec, eq_ci, starts_with_ci, SmtpMailMessage, CODE_CLOSING, CODE_OK, CODE_START_DATA,
    CODE_UNKNOWN, DATA_TERMINATOR,
};
use crate::sink::{MailSink, Severity};
use crate::transport::Transport;

/// Processes one inbound line per the shared dispatch table. `MAIL FROM`
/// opens a full receive transaction inline (acceptable per the spec's Design
/// Notes: the remainder of one transaction is small and bounded).
pub async fn dispatch_line(
    transport: &mut Transport,
    sink: &Arc<dyn MailSink>,
    connected: &Arc<AtomicBool>,
    username: &Option<String>,
    on_departure: &Option<Arc<dyn Fn(&str) + Send + Sync>>,
    line: &str,
) -> Result<()> {
    if starts_with_ci(line, "MAIL FROM") {
        receive_transaction(transport, line, sink).await?;
    } else if eq_ci(line, "QUIT") {
        transport
            .send_line(&format!(
                "{} {} Service closing transmission channel",
                CODE_CLOSING,
                transport.local_addr().ip()
            ))
            .await?;
        transport.close().await;
        connected.store(false, Ordering::SeqCst);
        sink.on_disconnect();
        if let Some(username) = username {
            sink.on_user_disconnect(username);
            if let Some(hook) = on_departure {
                hook(username);
            }
        }
    } else if starts_with_ci(line, "500") {
        sink.show_dialog(line, "warning", Severity::Warning);
    } else {
        transport
            .send_line(&format!("{CODE_UNKNOWN} unknown command"))
            .await?;
    }
    Ok(())
}

/// Runs the receiving half of one mail transaction: the `MAIL FROM` line has
/// already been read (it's passed in as `mail_from_line`); this reads every
/// `RCPT TO`, the `DATA` command, and the body up to the `.` sentinel, then
/// hands the reconstructed message to `sink.on_mail_received`.
pub async fn receive_transaction(
    transport: &mut Transport,
    mail_from_line: &str,
    sink: &Arc<dyn MailSink>,
) -> Result<()> {
    let smtp_from = codec::extract_bracketed_address(mail_from_line).unwrap_or_default();
    transport.send_line(&format!("{CODE_OK} OK")).await?;

    let mut smtp_recipients = Vec::new();
    loop {
        let line = transport.read_line().await?;
        if starts_with_ci(&line, "RCPT TO") {
            if let Some(addr) = codec::extract_bracketed_address(&line) {
                smtp_recipients.push(addr);
            }
            transport.send_line(&format!("{CODE_OK} OK")).await?;
        } else if eq_ci(&line, "DATA") {
            transport
                .send_line(&format!("{CODE_START_DATA} End data with <CR><LF> .<CR><LF>"))
                .await?;
            break;
        } else {
            transport
                .send_line(&format!("{CODE_UNKNOWN} unknown command"))
                .await?;
        }
    }

    let mut content_lines = Vec::new();
    loop {
        let line = transport.read_line().await?;
        if line == DATA_TERMINATOR {
            break;
        }
        content_lines.push(line);
    }

    let mail = codec::parse_incoming_body(&content_lines);
    transport.send_line(&format!("{CODE_OK} OK")).await?;

    let message = SmtpMailMessage::new(mail, smtp_from, smtp_recipients);
    sink.on_mail_received(&message);
    Ok(())
}

/// Runs the sending half of one mail transaction: `MAIL FROM`, one `RCPT TO`
/// per envelope recipient, `DATA`, the serialized body, and the `.`
/// sentinel, checking each ack per spec §4.1/§4.3.
pub async fn perform_send(transport: &mut Transport, message: &SmtpMailMessage) -> Result<()> {
    transport
        .send_line(&format!("MAIL FROM:<{}>", message.smtp_from))
        .await?;
    expect_ok(transport, "MAIL FROM").await?;

    for recipient in &message.smtp_recipients {
        transport.send_line(&format!("RCPT TO:<{recipient}>")).await?;
        expect_ok(transport, "RCPT TO").await?;
    }

    transport.send_line("DATA").await?;
    let ack = transport.read_line().await?;
    if !ack.starts_with(&CODE_START_DATA.to_string()) {
        anyhow::bail!("DATA not accepted: {ack}");
    }

    for line in codec::serialize_outgoing(&message.mail) {
        transport.send_line(&line).await?;
    }
    transport.send_line(DATA_TERMINATOR).await?;
    expect_ok(transport, "end of DATA").await?;

    Ok(())
}

async fn expect_ok(transport: &mut Transport, step: &str) -> Result<()> {
    let ack = transport.read_line().await?;
    if !ack.starts_with(&CODE_OK.to_string()) {
        anyhow::bail!("{step} not acknowledged: {ack}");
    }
    Ok(())
}
