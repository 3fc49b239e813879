//! The mail message data model: the display-level `MailMessage` composed by a
//! user (or reconstructed by the parser), and `SmtpMailMessage`, which adds the
//! envelope fields used for routing.

use serde::{Deserialize, Serialize};

/// A single piece of mail as a user would see it: sender, recipients, subject
/// and body. Immutable once handed to a queue; builder methods return `Self`
/// so composition reads as a chain of idempotent assignments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MailMessage {
    pub encrypted: bool,
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub date: String,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_to(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// A [`MailMessage`] plus the envelope addresses used for routing. The
/// envelope recipients (from `RCPT TO:<...>` lines) need not equal the
/// display `to`/`cc` lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpMailMessage {
    pub mail: MailMessage,
    pub smtp_from: String,
    pub smtp_recipients: Vec<String>,
}

impl SmtpMailMessage {
    pub fn new(mail: MailMessage, smtp_from: String, smtp_recipients: Vec<String>) -> Self {
        Self {
            mail,
            smtp_from,
            smtp_recipients,
        }
    }

    /// The envelope recipients as they'd appear on the wire, one `RCPT TO:<...>`
    /// target per entry, in the order `to` then `cc` were declared.
    pub fn recipients_from_display(mail: &MailMessage) -> Vec<String> {
        mail.to.iter().chain(mail.cc.iter()).cloned().collect()
    }
}
