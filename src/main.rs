//! autocut-proxy - VC-500W Cut-Mode Relay
//!
//! A transparent TCP relay between the local print backend and a Brother
//! VC-500W label printer. Print jobs passing through get a `<cutmode>`
//! directive injected so every label is cut automatically; all other traffic
//! is forwarded byte-for-byte.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autocut_proxy::{config::ConfigManager, ConnectionManager, ShutdownCoordinator};

/// CLI arguments for autocut-proxy
#[derive(Parser, Debug)]
#[command(name = "autocut-proxy")]
#[command(about = "Transparent cut-mode relay for the Brother VC-500W label printer")]
#[command(version)]
#[command(long_about = "
autocut-proxy - VC-500W Cut-Mode Relay

Sits between the local print backend and a networked VC-500W label printer,
forwarding traffic in both directions. Outbound <print> jobs that do not
already carry a <cutmode> element get <cutmode>full</cutmode> injected so the
printer cuts each label; everything else on the wire passes through verbatim.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  AUTOCUT_BIND_ADDR        - Listen address (e.g., 127.0.0.1:9100)
  AUTOCUT_PRINTER_HOST     - Printer hostname or IP
  AUTOCUT_PRINTER_PORT     - Printer port (default 9100)
  AUTOCUT_CUT_MODE         - Injected cut mode value (default full)
  AUTOCUT_CONNECT_TIMEOUT  - Printer connect timeout (e.g., 10s)
  AUTOCUT_BUFFER_SIZE      - Relay buffer size in bytes
  AUTOCUT_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short, long, help = "Listen address (e.g., 127.0.0.1:9100)")]
    pub bind: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, help = "Port to listen on")]
    pub port: Option<u16>,

    /// Printer hostname or IP (overrides config file)
    #[arg(long, help = "Printer hostname or IP address")]
    pub printer_host: Option<String>,

    /// Printer port (overrides config file)
    #[arg(long, help = "Printer port")]
    pub printer_port: Option<u16>,

    /// Cut mode value injected into print jobs
    #[arg(long, help = "Cut mode value injected into print jobs")]
    pub cut_mode: Option<String>,

    /// Relay buffer size in bytes
    #[arg(long, help = "Relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!(
        "Starting autocut-proxy v{} - VC-500W cut-mode relay",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.printer_host.as_deref(),
        args.printer_port,
        args.cut_mode.as_deref(),
        args.buffer_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Listen address: {}", config.server.bind_addr);
        info!("  Printer: {}:{}", config.printer.host, config.printer.port);
        info!("  Cut mode: {}", config.relay.cut_mode);
        info!("  Connect timeout: {:?}", config.server.connect_timeout);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Listen address: {}", config.server.bind_addr);
    info!("Printer endpoint: {}:{}", config.printer.host, config.printer.port);
    info!("Injected cut mode: {}", config.relay.cut_mode);

    // Create shutdown coordinator
    let shutdown_timeout = config.server.shutdown_timeout;
    let shutdown_coordinator = ShutdownCoordinator::new(shutdown_timeout);

    // Start the connection manager
    let connection_manager = ConnectionManager::new(std::sync::Arc::new(config));

    // Create a channel to communicate with the server task
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    // Start the server in a separate task
    let server_handle = tokio::spawn(async move {
        let mut manager = connection_manager;

        tokio::select! {
            result = manager.start() => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = shutdown_rx => {
                info!("Server task received shutdown signal");
                manager.initiate_shutdown();
                if let Err(e) = manager.wait_for_sessions_to_close().await {
                    error!("Error during session cleanup: {}", e);
                }
            }
        }
    });

    info!("autocut-proxy started, waiting for print jobs");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    // Start listening for shutdown signals
    let signal_result = shutdown_coordinator.listen_for_signals().await;
    if let Err(e) = signal_result {
        error!("Error setting up signal handlers: {}", e);
    }

    // Initiate graceful shutdown
    info!("Initiating graceful shutdown...");

    if shutdown_tx.send(()).is_err() {
        warn!("Failed to send shutdown signal to server task");
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
