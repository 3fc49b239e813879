//! The injected UI/logging sink (spec §6). The graphical server and client
//! shells are out of scope; this trait is the seam they would implement.
//! [`LoggingSink`] is the default, fully headless implementation used by both
//! binaries and by every test in this crate.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};

use crate::protocol::SmtpMailMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Callbacks a connected UI (or, headlessly, a logger) reacts to.
pub trait MailSink: Send + Sync {
    fn show_dialog(&self, text: &str, title: &str, severity: Severity);
    fn log(&self, line: &str);
    fn on_mail_received(&self, message: &SmtpMailMessage);
    fn on_disconnect(&self);
    fn on_user_disconnect(&self, username: &str);
}

/// Default sink: every callback becomes a `log` crate call at a severity
/// matching the event, with no UI involved.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl MailSink for LoggingSink {
    fn show_dialog(&self, text: &str, title: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("[{title}] {text}"),
            Severity::Warning => warn!("[{title}] {text}"),
            Severity::Error => log::error!("[{title}] {text}"),
        }
    }

    fn log(&self, line: &str) {
        info!("{line}");
    }

    fn on_mail_received(&self, message: &SmtpMailMessage) {
        info!(
            "mail received: from={} to={:?} subject={:?}",
            message.smtp_from, message.smtp_recipients, message.mail.subject
        );
    }

    fn on_disconnect(&self) {
        info!("session disconnected");
    }

    fn on_user_disconnect(&self, username: &str) {
        info!("user {username} disconnected");
    }
}

/// Writes one file per accepted delivery under
/// `logs/<host-or-"localServer">/<user>/<timestamp>.txt`, as specified in §6.
/// This is the "file-per-message log artifact" the spec treats as an
/// out-of-scope sink; it is still useful headlessly so the queue processor
/// has somewhere real to write.
pub struct FileLogSink {
    root: PathBuf,
}

impl FileLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn write_delivery(&self, host_label: &str, username: &str, message: &SmtpMailMessage) -> std::io::Result<()> {
        let dir = self.root.join(host_label).join(username);
        fs::create_dir_all(&dir)?;

        let timestamp = Local::now().format("%Y.%m.%d-%H:%M:%S").to_string();
        let path: &Path = &dir.join(format!("{timestamp}.txt"));
        let mut file = fs::File::create(path)?;

        writeln!(file, "encrypted: {}", message.mail.encrypted)?;
        writeln!(file, "from: {}", message.mail.sender)?;
        writeln!(file, "to: {}", message.mail.to.join(", "))?;
        writeln!(file, "cc: {}", message.mail.cc.join(", "))?;
        writeln!(file, "date: {}", message.mail.date)?;
        writeln!(file, "subject: {}", message.mail.subject)?;
        writeln!(file)?;
        writeln!(file, "{}", message.mail.body)?;
        Ok(())
    }
}
