//! Relay Engine
//!
//! Dials the printer and runs the two directional pumps of a session. The
//! inbound pump (producer -> printer) is the only place the stream is
//! inspected: control messages go through the rewrite step and a `print`
//! message arms the payload counter for the bytes that follow. The outbound
//! pump (printer -> producer) is a verbatim copy with no framing awareness.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{RelaySession, SessionStats};
use crate::config::Config;
use crate::protocol::{maybe_rewrite, FrameReader, Unit};
use crate::Result;

/// Connects to the printer and pumps one session in both directions.
pub struct RelayEngine {
    printer_host: String,
    printer_port: u16,
    cut_mode: String,
    connect_timeout: Duration,
    buffer_size: usize,
    max_message_bytes: usize,
}

impl RelayEngine {
    /// Create a relay engine from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            printer_host: config.printer.host.clone(),
            printer_port: config.printer.port,
            cut_mode: config.relay.cut_mode.clone(),
            connect_timeout: config.server.connect_timeout,
            buffer_size: config.server.buffer_size,
            max_message_bytes: config.relay.max_message_bytes,
        }
    }

    /// Establish the upstream connection to the printer.
    ///
    /// Failure here aborts the session before any relaying begins; there is
    /// no retry at this layer. The producer's own retry handling governs
    /// re-attempts.
    pub async fn connect_to_printer(&self) -> Result<(TcpStream, SocketAddr)> {
        let host_port = format!("{}:{}", self.printer_host, self.printer_port);
        debug!("Resolving printer address {}", host_port);

        let addrs: Vec<SocketAddr> = timeout(self.connect_timeout, lookup_host(&host_port))
            .await
            .map_err(|_| anyhow!("DNS resolution timed out for {}", host_port))?
            .with_context(|| format!("DNS resolution failed for {}", host_port))?
            .collect();

        if addrs.is_empty() {
            return Err(anyhow!("DNS resolution returned no addresses for {}", host_port));
        }

        let mut last_error = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    info!("Connected to printer at {}", addr);
                    return Ok((stream, addr));
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to printer at {}: {}", addr, e);
                    last_error = Some(anyhow!(e));
                }
                Err(_) => {
                    warn!("Connection to printer at {} timed out", addr);
                    last_error = Some(anyhow!("connection timed out"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no printer address reachable")))
            .with_context(|| format!("Failed to connect to printer {}", host_port))
    }

    /// Run one complete relay session for an accepted producer connection.
    ///
    /// Both pumps run as independent tasks; the first to finish (EOF or
    /// error) aborts the other, so both sockets are torn down together.
    /// Half-open sessions are not supported.
    pub async fn run_session(&self, producer: TcpStream) -> Result<SessionStats> {
        let producer_addr = producer
            .peer_addr()
            .context("Failed to get producer address")?;

        let (printer, printer_addr) = self.connect_to_printer().await?;

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let session_id = format!("session_{}_{}", timestamp, producer_addr.port());
        let session = Arc::new(RelaySession::new(session_id, producer_addr, printer_addr));

        let (producer_read, producer_write) = producer.into_split();
        let (printer_read, printer_write) = printer.into_split();

        let reader = FrameReader::new(producer_read, self.max_message_bytes, self.buffer_size);
        let mut inbound = tokio::spawn(inbound_pump(
            reader,
            printer_write,
            self.cut_mode.clone(),
            Arc::clone(&session),
        ));
        let mut outbound = tokio::spawn(outbound_pump(
            printer_read,
            producer_write,
            self.buffer_size,
            Arc::clone(&session),
        ));

        let result = tokio::select! {
            r = &mut inbound => {
                outbound.abort();
                join_pump(r, "inbound")
            }
            r = &mut outbound => {
                inbound.abort();
                join_pump(r, "outbound")
            }
        };

        session.log_stats();

        result.map(|()| session.to_stats())
    }
}

fn join_pump(joined: std::result::Result<Result<()>, tokio::task::JoinError>, name: &str) -> Result<()> {
    match joined {
        Ok(result) => result.with_context(|| format!("{} pump failed", name)),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(anyhow!("{} pump panicked: {}", name, e)),
    }
}

/// Producer -> printer: framed units, with the rewrite step on control
/// messages and verbatim forwarding of payload chunks.
async fn inbound_pump(
    mut reader: FrameReader<OwnedReadHalf>,
    mut printer: OwnedWriteHalf,
    cut_mode: String,
    session: Arc<RelaySession>,
) -> Result<()> {
    loop {
        match reader.read_unit().await? {
            Unit::Control(raw) => {
                let rewritten = maybe_rewrite(raw, &cut_mode);
                printer
                    .write_all(&rewritten.bytes)
                    .await
                    .context("Failed to write control message to printer")?;
                session.add_bytes_up(rewritten.bytes.len() as u64);

                if rewritten.datasize > 0 {
                    debug!(
                        session_id = %session.session_id,
                        datasize = rewritten.datasize,
                        "print job announced payload"
                    );
                    reader.set_pending_payload(rewritten.datasize)?;
                }
            }
            Unit::Payload(chunk) => {
                printer
                    .write_all(&chunk)
                    .await
                    .context("Failed to write payload to printer")?;
                session.add_bytes_up(chunk.len() as u64);
            }
            Unit::Eof => {
                debug!(session_id = %session.session_id, "producer closed the connection");
                return Ok(());
            }
        }
    }
}

/// Printer -> producer: chunked verbatim copy. Status responses are never
/// inspected or rewritten.
async fn outbound_pump(
    mut printer: OwnedReadHalf,
    mut producer: OwnedWriteHalf,
    buffer_size: usize,
    session: Arc<RelaySession>,
) -> Result<()> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = printer
            .read(&mut buf)
            .await
            .context("Failed to read from printer")?;
        if n == 0 {
            debug!(session_id = %session.session_id, "printer closed the connection");
            return Ok(());
        }
        producer
            .write_all(&buf[..n])
            .await
            .context("Failed to write to producer")?;
        session.add_bytes_down(n as u64);
    }
}
