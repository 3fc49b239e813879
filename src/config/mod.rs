//! Manages application configuration loaded from environment variables.
//!
//! This module defines the `Config` struct which holds all runtime settings
//! and provides the `from_env` function to populate this struct. It supports
//! loading variables from a `.env` file via the `dotenv` crate and provides
//! default values for optional settings.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Holds the application's runtime configuration settings.
///
/// These settings are typically loaded from environment variables via `from_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The IP address the SMTP server should listen on. (Optional: `RELAYMAIL_BIND_ADDRESS`, Default: "0.0.0.0")
    pub smtp_bind_address: String,

    /// The network port the SMTP server should listen on. (Optional: `RELAYMAIL_PORT`, Default: 25)
    pub smtp_port: u16,

    /// Hostname override used in the greeting and in the local-hostnames set
    /// in place of the OS-reported hostname. (Optional: `RELAYMAIL_HOSTNAME`)
    pub hostname_override: Option<String>,

    /// The IP address the health check HTTP server should listen on. (Optional: `RELAYMAIL_HEALTH_BIND_ADDRESS`, Default: "0.0.0.0")
    pub health_check_bind_address: String,

    /// The network port the health check HTTP server should listen on. (Optional: `RELAYMAIL_HEALTH_PORT`, Default: 8080)
    pub health_check_port: u16,

    /// Whether LOGIN credentials are actually checked against the auth store.
    /// Disabling this accepts any username/password pair. (Optional: `RELAYMAIL_SECURITY_ENABLED`, Default: true)
    pub security_enabled: bool,

    /// Path to the auth store's persisted binary file. (Optional: `RELAYMAIL_AUTH_STORE_PATH`, Default: "relaymail-auth.bin")
    pub auth_store_path: String,

    /// Path to the local-delivery queue's persisted file. (Optional: `RELAYMAIL_INCOMING_QUEUE_PATH`, Default: "relaymail-incoming.queue")
    pub incoming_queue_path: String,

    /// Path to the outbound-relay queue's persisted file. (Optional: `RELAYMAIL_OUTGOING_QUEUE_PATH`, Default: "relaymail-outgoing.queue")
    pub outgoing_queue_path: String,

    /// Root directory for the per-message delivery log sink. (Optional: `RELAYMAIL_LOG_ROOT`, Default: "logs")
    pub log_root: String,
}

impl Config {
    /// Loads configuration settings from environment variables.
    ///
    /// Reads variables prefixed with `RELAYMAIL_`. Supports loading from a
    /// `.env` file if present. Provides default values for every optional
    /// setting. Logs the configuration values being used.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if an optional port or boolean variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self> {
        // Attempt to load variables from a .env file, if it exists. Ignore errors.
        let _ = dotenv::dotenv();

        let smtp_bind_address = env::var("RELAYMAIL_BIND_ADDRESS")
            .map(|val| {
                log::info!("Config: Using smtp_bind_address from env: {}", val);
                val
            })
            .unwrap_or_else(|_| {
                let default_val = "0.0.0.0".to_string();
                log::info!("Config: Using default smtp_bind_address: {}", default_val);
                default_val
            });

        let smtp_port_str = env::var("RELAYMAIL_PORT").unwrap_or_else(|_| "25".to_string());
        let smtp_port = match smtp_port_str.parse::<u16>() {
            Ok(port) => port,
            Err(e) => {
                let err_msg = format!("RELAYMAIL_PORT ('{}') must be a valid u16 port number", smtp_port_str);
                log::error!("{}: {}", err_msg, e);
                return Err(anyhow!(e).context(err_msg));
            }
        };
        log::info!("Config: Using smtp_port: {}", smtp_port);

        let hostname_override = env::var("RELAYMAIL_HOSTNAME").ok();
        if let Some(ref h) = hostname_override {
            log::info!("Config: Using hostname override: {}", h);
        }

        let health_check_bind_address = env::var("RELAYMAIL_HEALTH_BIND_ADDRESS")
            .map(|val| {
                log::info!("Config: Using health_check_bind_address from env: {}", val);
                val
            })
            .unwrap_or_else(|_| {
                let default_val = "0.0.0.0".to_string();
                log::info!(
                    "Config: Using default health_check_bind_address: {}",
                    default_val
                );
                default_val
            });

        let health_check_port_str =
            env::var("RELAYMAIL_HEALTH_PORT").unwrap_or_else(|_| "8080".to_string());
        let health_check_port = match health_check_port_str.parse::<u16>() {
            Ok(port) => port,
            Err(e) => {
                let err_msg = format!(
                    "RELAYMAIL_HEALTH_PORT ('{}') must be a valid u16 port number",
                    health_check_port_str
                );
                log::error!("{}: {}", err_msg, e);
                return Err(anyhow!(e).context(err_msg));
            }
        };
        log::info!("Config: Using health_check_port: {}", health_check_port);

        let security_enabled_str =
            env::var("RELAYMAIL_SECURITY_ENABLED").unwrap_or_else(|_| "true".to_string());
        let security_enabled = match security_enabled_str.parse::<bool>() {
            Ok(v) => v,
            Err(e) => {
                let err_msg = format!(
                    "RELAYMAIL_SECURITY_ENABLED ('{}') must be 'true' or 'false'",
                    security_enabled_str
                );
                log::error!("{}: {}", err_msg, e);
                return Err(anyhow!(e).context(err_msg));
            }
        };
        log::info!("Config: Using security_enabled: {}", security_enabled);

        let auth_store_path =
            env::var("RELAYMAIL_AUTH_STORE_PATH").unwrap_or_else(|_| "relaymail-auth.bin".to_string());
        let incoming_queue_path = env::var("RELAYMAIL_INCOMING_QUEUE_PATH")
            .unwrap_or_else(|_| "relaymail-incoming.queue".to_string());
        let outgoing_queue_path = env::var("RELAYMAIL_OUTGOING_QUEUE_PATH")
            .unwrap_or_else(|_| "relaymail-outgoing.queue".to_string());
        let log_root = env::var("RELAYMAIL_LOG_ROOT").unwrap_or_else(|_| "logs".to_string());
        log::info!("Config: Using auth_store_path: {}", auth_store_path);

        // Construct the final Config object
        Ok(Config {
            smtp_bind_address,
            smtp_port,
            hostname_override,
            health_check_bind_address,
            health_check_port,
            security_enabled,
            auth_store_path,
            incoming_queue_path,
            outgoing_queue_path,
            log_root,
        })
    }
}

// The inline tests module has been moved to src/config/tests.rs
// and is included via `mod tests;` below.

// Include the tests defined in tests.rs
mod tests;
