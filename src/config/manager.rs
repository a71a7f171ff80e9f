//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("AUTOCUT_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid AUTOCUT_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(host) = std::env::var("AUTOCUT_PRINTER_HOST") {
            config.printer.host = host;
        }

        if let Ok(port) = std::env::var("AUTOCUT_PRINTER_PORT") {
            config.printer.port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid AUTOCUT_PRINTER_PORT: {}", port))?;
        }

        if let Ok(cut_mode) = std::env::var("AUTOCUT_CUT_MODE") {
            config.relay.cut_mode = cut_mode;
        }

        if let Ok(timeout) = std::env::var("AUTOCUT_CONNECT_TIMEOUT") {
            config.server.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid AUTOCUT_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(buffer_size) = std::env::var("AUTOCUT_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid AUTOCUT_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(log_level) = std::env::var("AUTOCUT_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_printer_config()
            .with_context(|| "Printer configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.connect_timeout.as_secs() == 0 {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_printer_config(&self) -> Result<()> {
        if self.printer.host.is_empty() {
            bail!("printer.host must not be empty");
        }

        if self.printer.port == 0 {
            bail!("printer.port must not be 0");
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.cut_mode.is_empty() {
            bail!("relay.cut_mode must not be empty");
        }

        // The value is spliced into an XML element.
        if self.relay.cut_mode.contains(['<', '>', '&']) {
            bail!("relay.cut_mode must not contain XML markup characters");
        }

        if self.relay.max_message_bytes < 512 {
            bail!("relay.max_message_bytes must be at least 512");
        }

        if self.relay.max_message_bytes > 1048576 {
            bail!("relay.max_message_bytes cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        printer_host: Option<&str>,
        printer_port: Option<u16>,
        cut_mode: Option<&str>,
        buffer_size: Option<usize>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: listen port set to {}", port);
        }

        if let Some(host) = printer_host {
            self.printer.host = host.to_string();
            tracing::info!("CLI override: printer host set to {}", host);
        }

        if let Some(port) = printer_port {
            self.printer.port = port;
            tracing::info!("CLI override: printer port set to {}", port);
        }

        if let Some(cut_mode) = cut_mode {
            self.relay.cut_mode = cut_mode.to_string();
            tracing::info!("CLI override: cut mode set to {}", cut_mode);
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_markup_in_cut_mode() {
        let mut config = Config::default();
        config.relay.cut_mode = "</print>".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_printer_host() {
        let mut config = Config::default();
        config.printer.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind_addr = "127.0.0.1:9100"
max_connections = 64
connect_timeout = "10s"
shutdown_timeout = "30s"
buffer_size = 65536

[printer]
host = "vc-500w.host"
port = 9100

[relay]
cut_mode = "full"
max_message_bytes = 50000

[monitoring]
log_level = "debug"
"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&path).unwrap();
        assert_eq!(config.printer.host, "vc-500w.host");
        assert_eq!(config.relay.cut_mode, "full");
        assert_eq!(config.server.connect_timeout.as_secs(), 10);
        assert_eq!(config.monitoring.log_level, "debug");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            ConfigManager::load_from_file(std::path::Path::new("/nonexistent/config.toml"))
                .unwrap();
        assert_eq!(config.server.bind_addr.port(), 9100);
    }

    #[test]
    fn cli_overrides_take_effect() {
        let mut config = Config::default();
        config.merge_with_cli_args(
            Some("127.0.0.1:19100"),
            None,
            Some("printer.local"),
            Some(9101),
            Some("full"),
            None,
        );
        assert_eq!(config.server.bind_addr.port(), 19100);
        assert_eq!(config.printer.host, "printer.local");
        assert_eq!(config.printer.port, 9101);
    }
}
