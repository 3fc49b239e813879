//! Classifies each received message's envelope recipients as local or
//! remote and routes them into the appropriate queue (spec §4.5).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use log::warn;
use tokio::sync::Mutex;

use crate::protocol::SmtpMailMessage;
use crate::queue::IncomingEntry;
use crate::sink::{LoggingSink, MailSink, Severity};

/// The dispatcher is itself a [`MailSink`]: every session on the server
/// (incoming client connections) is constructed with the dispatcher as its
/// sink, so `on_mail_received` is the one place inbound mail is classified.
pub struct Dispatcher {
    local_hostnames: HashSet<String>,
    incoming: Arc<Mutex<VecDeque<IncomingEntry>>>,
    outgoing: Arc<Mutex<VecDeque<SmtpMailMessage>>>,
    fallback: LoggingSink,
}

impl Dispatcher {
    pub fn new(
        local_hostnames: HashSet<String>,
        incoming: Arc<Mutex<VecDeque<IncomingEntry>>>,
        outgoing: Arc<Mutex<VecDeque<SmtpMailMessage>>>,
    ) -> Self {
        Self {
            local_hostnames,
            incoming,
            outgoing,
            fallback: LoggingSink,
        }
    }

    fn is_local_host(&self, host: &str) -> bool {
        self.local_hostnames.contains(&host.to_lowercase())
    }

    async fn route(&self, message: SmtpMailMessage) {
        let mut queued_outgoing = false;

        for recipient in &message.smtp_recipients {
            if recipient.is_empty() {
                continue;
            }
            let Some((user, host)) = split_once_non_empty(recipient) else {
                warn!("malformed recipient address, skipping: {recipient:?}");
                continue;
            };

            if self.is_local_host(host) {
                let entry = IncomingEntry {
                    username: user.to_string(),
                    message: message.mail.clone(),
                };
                self.incoming.lock().await.push_back(entry);
            } else if !queued_outgoing {
                self.outgoing.lock().await.push_back(message.clone());
                queued_outgoing = true;
            }
        }
    }
}

/// Splits `addr` once on `@`; returns `None` unless both parts are non-empty.
fn split_once_non_empty(addr: &str) -> Option<(&str, &str)> {
    let mut parts = addr.splitn(2, '@');
    let user = parts.next()?;
    let host = parts.next()?;
    if user.is_empty() || host.is_empty() || addr.matches('@').count() != 1 {
        return None;
    }
    Some((user, host))
}

impl MailSink for Dispatcher {
    fn show_dialog(&self, text: &str, title: &str, severity: Severity) {
        self.fallback.show_dialog(text, title, severity);
    }

    fn log(&self, line: &str) {
        self.fallback.log(line);
    }

    fn on_mail_received(&self, message: &SmtpMailMessage) {
        let message = message.clone();
        let incoming = self.incoming.clone();
        let outgoing = self.outgoing.clone();
        let local_hostnames = self.local_hostnames.clone();
        // on_mail_received is synchronous in the MailSink contract (mirroring
        // the original injected-sink interface); the actual queue insertion
        // is a couple of uncontended async mutex locks, so it's spawned as a
        // short-lived task rather than forcing the trait itself to be async.
        tokio::spawn(async move {
            let dispatcher = Dispatcher {
                local_hostnames,
                incoming,
                outgoing,
                fallback: LoggingSink,
            };
            dispatcher.route(message).await;
        });
    }

    fn on_disconnect(&self) {
        self.fallback.on_disconnect();
    }

    fn on_user_disconnect(&self, username: &str) {
        self.fallback.on_user_disconnect(username);
    }
}
