//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::{DEFAULT_CUT_MODE, MAX_MESSAGE_BYTES};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub printer: PrinterConfig,
    pub relay: RelayConfig,
    pub monitoring: MonitoringConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Local address the relay listens on. The vendor backend connects here.
    pub bind_addr: SocketAddr,
    /// Sanity bound only; the relay imposes no admission control.
    pub max_connections: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub buffer_size: usize,
}

/// Upstream printer endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    pub host: String,
    pub port: u16,
}

/// Rewrite behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Value of the injected `<cutmode>` element.
    pub cut_mode: String,
    /// Cap on a buffered control message; framing gives up beyond this.
    pub max_message_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:9100".parse().unwrap(),
                max_connections: 64,
                connect_timeout: Duration::from_secs(10),
                shutdown_timeout: Duration::from_secs(30),
                buffer_size: 65536,
            },
            printer: PrinterConfig {
                host: "vc-500w.host".to_string(),
                port: 9100,
            },
            relay: RelayConfig {
                cut_mode: DEFAULT_CUT_MODE.to_string(),
                max_message_bytes: MAX_MESSAGE_BYTES,
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
