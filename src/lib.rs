//! Orchestrates the relay server's startup and component lifecycle.
//!
//! This library crate initializes configuration and concurrently runs the
//! primary services (SMTP listener, queue processor, health check). It
//! ensures that if any essential service terminates unexpectedly, the entire
//! application shuts down gracefully, persisting both queues to disk first.

pub mod auth;
pub mod client;
pub mod config;
pub mod health;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;
pub mod sink;
pub mod transport;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use log::{error, info};
use tokio::select;

use auth::AuthStore;
use config::Config;
use server::{Dispatcher, Listener};

/// Runs the main relay application logic.
///
/// Loads configuration and the auth store, wires the dispatcher/queues to
/// the listener, and launches the SMTP listener, queue processor, and health
/// check server as separate tasks. Monitors all three with `tokio::select!`
/// alongside a Ctrl-C signal; on any of these, persists both queues and the
/// auth store before returning.
///
/// # Returns
///
/// - `Ok(())`: a graceful shutdown (Ctrl-C) was handled.
/// - `Err(anyhow::Error)`: configuration loading failed, or one of the
///   essential server tasks terminated unexpectedly.
pub async fn run() -> Result<()> {
    info!(
        "Starting {} v{} mail relay",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let auth = Arc::new(AuthStore::load(&config.auth_store_path)?);

    let bind_addr: SocketAddr = format!("{}:{}", config.smtp_bind_address, config.smtp_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid SMTP bind address: {e}"))?;

    let local_hostnames = local_hostnames_set(&config, &bind_addr);
    info!("local hostnames set: {local_hostnames:?}");

    let (incoming, outgoing) = server::new_queues();
    let dispatcher = Arc::new(Dispatcher::new(local_hostnames, incoming.clone(), outgoing.clone()));

    let sessions: server::SessionMap = Arc::new(StdMutex::new(std::collections::HashMap::new()));

    let queue_processor = Arc::new(queue::QueueProcessor::new(
        incoming,
        outgoing,
        sessions.clone(),
        config.log_root.clone(),
        config.incoming_queue_path.clone(),
        config.outgoing_queue_path.clone(),
    ));
    queue_processor.restore().await?;

    let listener = Listener::new(bind_addr, auth.clone(), config.security_enabled, sessions, dispatcher);
    let listening_flag = listener.listening_flag();
    let shutdown_notify = listener.shutdown_notify();

    let running_flag = Arc::new(AtomicBool::new(true));

    let health_config = config.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health::run_health_server(health_config).await {
            error!("Health check server encountered a fatal error: {}", e);
            Err(e)
        } else {
            Ok(())
        }
    });

    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("SMTP listener encountered a fatal error: {}", e);
            Err(e)
        } else {
            Ok(())
        }
    });

    let queue_processor_for_task = queue_processor.clone();
    let running_for_task = running_flag.clone();
    let queue_handle = tokio::spawn(async move {
        queue_processor_for_task.run(running_for_task).await;
        Ok::<(), anyhow::Error>(())
    });

    let shutdown_result = select! {
        res = health_handle => {
            error!("Health check server task terminated.");
            unwrap_task_result(res, "Health check server")
        },
        res = listener_handle => {
            error!("SMTP listener task terminated.");
            unwrap_task_result(res, "SMTP listener")
        },
        res = queue_handle => {
            error!("Queue processor task terminated.");
            unwrap_task_result(res, "Queue processor")
        },
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        },
    };

    info!("shutting down: persisting queues and auth store");
    listening_flag.store(false, Ordering::SeqCst);
    shutdown_notify.notify_one();
    running_flag.store(false, Ordering::SeqCst);
    if let Err(e) = queue_processor.persist().await {
        error!("failed to persist queues on shutdown: {e:#}");
    }
    if let Err(e) = auth.save(&config.auth_store_path) {
        error!("failed to persist auth store on shutdown: {e:#}");
    }

    shutdown_result
}

fn unwrap_task_result(res: Result<Result<()>, tokio::task::JoinError>, label: &str) -> Result<()> {
    match res {
        Ok(Ok(())) => Err(anyhow::anyhow!("{label} exited cleanly, which is unexpected.")),
        Ok(Err(e)) => {
            error!("{label} returned error: {}", e);
            Err(e)
        }
        Err(join_error) => {
            error!("{label} task failed (panic or cancellation): {}", join_error);
            Err(anyhow::anyhow!("{label} task failed: {}", join_error))
        }
    }
}

/// The local-hostnames set used by the dispatcher to classify recipients
/// (§4.5, glossary): system hostname, any configured override, the bound
/// listener IP, and the literal `localhost`.
fn local_hostnames_set(config: &Config, bind_addr: &SocketAddr) -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert("localhost".to_string());
    set.insert(bind_addr.ip().to_string());

    if let Some(ref h) = config.hostname_override {
        set.insert(h.to_lowercase());
    }
    if let Ok(h) = hostname::get() {
        if let Ok(h) = h.into_string() {
            set.insert(h.to_lowercase());
        }
    }
    set
}
