//! Graceful Shutdown Handling
//!
//! This module provides utilities for handling graceful shutdown of the relay.
//! It supports SIGTERM and SIGINT signals and ensures active sessions are
//! drained before the process exits.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notification for shutdown completion
    shutdown_complete: Arc<Notify>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_complete = Arc::new(Notify::new());

        Self {
            shutdown_tx,
            shutdown_complete,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a handle to wait for shutdown completion
    pub fn completion_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_complete)
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Perform graceful shutdown of the connection manager
    pub async fn shutdown_connection_manager(
        &self,
        connection_manager: &ConnectionManager,
    ) -> Result<()> {
        connection_manager.initiate_shutdown();
        connection_manager.wait_for_sessions_to_close().await?;

        self.shutdown_complete.notify_waiters();
        Ok(())
    }

    /// Wait for shutdown completion with timeout
    pub async fn wait_for_completion(&self) -> Result<()> {
        tokio::time::timeout(
            self.timeout + Duration::from_secs(5),
            self.shutdown_complete.notified(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Shutdown completion timeout"))?;

        Ok(())
    }
}
