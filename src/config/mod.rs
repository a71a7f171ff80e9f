//! Configuration module - startup configuration for the relay

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::{Config, MonitoringConfig, PrinterConfig, RelayConfig, ServerConfig};
