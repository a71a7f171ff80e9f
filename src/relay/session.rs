//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// One paired producer/printer connection.
///
/// Byte counters are atomics only because both pumps report through the same
/// shared handle; no other state crosses the pump boundary.
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub producer_addr: SocketAddr,
    pub printer_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Statistics for a finished session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub producer_addr: SocketAddr,
    pub printer_addr: SocketAddr,
    pub duration_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl RelaySession {
    pub fn new(session_id: String, producer_addr: SocketAddr, printer_addr: SocketAddr) -> Self {
        debug!(
            "Creating relay session {} ({} -> {})",
            session_id, producer_addr, printer_addr
        );

        Self {
            session_id,
            producer_addr,
            printer_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes forwarded producer -> printer so far.
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes forwarded printer -> producer so far.
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn to_stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            producer_addr: self.producer_addr,
            printer_addr: self.printer_addr,
            duration_ms: self.duration().as_millis() as u64,
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
        }
    }

    /// Emit the session completion record.
    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            producer_addr = %self.producer_addr,
            printer_addr = %self.printer_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            "Relay session finished"
        );
    }
}
