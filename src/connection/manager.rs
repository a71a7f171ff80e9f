//! Connection Manager Implementation
//!
//! Accepts producer connections and spawns one relay session task per
//! connection. Accepting is independent of any running session; a failed
//! session only produces a log record and never stops the listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::relay::RelayEngine;
use crate::Result;

/// Manages the listening socket and session lifecycle
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    engine: Arc<RelayEngine>,
    active_sessions: Arc<AtomicUsize>,
    next_connection_id: AtomicUsize,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let engine = Arc::new(RelayEngine::from_config(&config));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            engine,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicUsize::new(1),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the listening socket and return the bound address.
    ///
    /// Separate from [`run`](Self::run) so a caller binding to port 0 can
    /// observe the actual port.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Successfully bound to {}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Get the bound address if the listener is initialized
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Bind and run the acceptance loop until shutdown.
    pub async fn start(&mut self) -> Result<()> {
        self.bind().await?;
        self.run().await
    }

    /// Main connection acceptance loop
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);

                            if self.shutdown_flag.load(Ordering::Relaxed) {
                                debug!("Rejecting connection from {} due to shutdown", addr);
                                continue;
                            }

                            let connection_id = format!(
                                "conn_{}",
                                self.next_connection_id.fetch_add(1, Ordering::Relaxed)
                            );

                            let engine = Arc::clone(&self.engine);
                            let active_sessions = Arc::clone(&self.active_sessions);

                            tokio::spawn(async move {
                                active_sessions.fetch_add(1, Ordering::Relaxed);
                                let start_time = Instant::now();

                                info!("Started relay session for connection {} from {}", connection_id, addr);

                                match engine.run_session(stream).await {
                                    Ok(stats) => {
                                        info!(
                                            "Connection {} completed: {} bytes to printer, {} bytes to producer in {:?}",
                                            connection_id,
                                            stats.bytes_up,
                                            stats.bytes_down,
                                            start_time.elapsed()
                                        );
                                    }
                                    Err(e) => {
                                        // Session-local failure; the listener keeps accepting.
                                        error!("Connection {} from {} failed: {:#}", connection_id, addr, e);
                                    }
                                }

                                active_sessions.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Get the number of active relay sessions
    pub fn get_active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to acceptance loop: {}", e);
        }
    }

    /// Get a shutdown receiver for external components
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for running sessions to finish, up to the shutdown timeout.
    pub async fn wait_for_sessions_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            self.get_active_sessions(),
            shutdown_timeout
        );

        while self.get_active_sessions() > 0 && start_time.elapsed() < shutdown_timeout {
            debug!("Waiting for {} active sessions to close", self.get_active_sessions());
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let remaining = self.get_active_sessions();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, remaining
            );
        }

        Ok(())
    }

    /// Gracefully shutdown the connection manager
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_sessions_to_close().await
    }
}
