//! autocut-proxy Library
//!
//! Transparent TCP relay for the Brother VC-500W label printer that injects a
//! `<cutmode>` directive into outbound print jobs so every label is cut
//! automatically. Everything else on the wire (other control messages, the
//! binary image payload, printer status responses) is forwarded verbatim.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
