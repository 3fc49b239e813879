//! A minimal command-line client: connects, logs in, optionally sends one
//! message, then stays connected to print inbound deliveries until `QUIT`.
//!
//! Usage:
//!   relaymail-client <host> <port> <username> <password> [--to <addr> --subject <s> --body <b> [--encrypt]]
//!
//! With no `--to`, the client just logs in and listens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::error;
use relaymail::client::{self, ConsoleSink};
use relaymail::protocol::MailMessage;

struct Args {
    host: String,
    port: u16,
    username: String,
    password: String,
    to: Option<String>,
    subject: String,
    body: String,
    encrypt: bool,
}

fn parse_args() -> Result<Args> {
    let mut raw: Vec<String> = std::env::args().skip(1).collect();
    if raw.len() < 4 {
        return Err(anyhow!(
            "usage: relaymail-client <host> <port> <username> <password> [--to <addr> --subject <s> --body <b> [--encrypt]]"
        ));
    }

    let password = raw.remove(3);
    let username = raw.remove(2);
    let port: u16 = raw.remove(1).parse().map_err(|e| anyhow!("invalid port: {e}"))?;
    let host = raw.remove(0);

    let mut to = None;
    let mut subject = String::new();
    let mut body = String::new();
    let mut encrypt = false;

    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--to" => {
                to = raw.get(i + 1).cloned();
                i += 2;
            }
            "--subject" => {
                subject = raw.get(i + 1).cloned().unwrap_or_default();
                i += 2;
            }
            "--body" => {
                body = raw.get(i + 1).cloned().unwrap_or_default();
                i += 2;
            }
            "--encrypt" => {
                encrypt = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(Args {
        host,
        port,
        username,
        password,
        to,
        subject,
        body,
        encrypt,
    })
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    if let Err(e) = run().await {
        error!("client error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = parse_args()?;
    let sender = format!("{}@{}", args.username, args.host);

    let (handle, task) = client::connect(
        &args.host,
        args.port,
        &hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string()),
        &args.username,
        &args.password,
        Arc::new(ConsoleSink),
    )
    .await?;

    if let Some(to) = args.to {
        let mail = MailMessage::new()
            .with_encrypted(args.encrypt)
            .with_sender(sender.clone())
            .with_to(vec![to.clone()])
            .with_date(chrono::Local::now().format("%Y-%m-%d").to_string())
            .with_subject(args.subject)
            .with_body(args.body);

        client::submit(&handle, sender, vec![to], mail);
        tokio::time::sleep(Duration::from_millis(500)).await;
        client::quit(&handle);
    }

    let _ = task.await;
    Ok(())
}
