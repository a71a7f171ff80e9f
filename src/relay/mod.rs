//! Relay module - session pumps between producer and printer

pub mod engine;
pub mod session;

pub use engine::RelayEngine;
pub use session::{RelaySession, SessionStats};
