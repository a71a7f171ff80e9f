//! VC-500W Wire Protocol
//!
//! The printer protocol is a stream of self-delimited XML control messages
//! interleaved with raw binary image payload. A `<print>` message declares the
//! length of the payload that immediately follows it via its `datasize` child;
//! payload bytes must never be scanned for XML framing.

pub mod constants;
pub mod framing;
pub mod message;

pub use framing::{FrameError, FrameReader, Unit};
pub use message::{maybe_rewrite, ControlMessage, ParseError, Rewritten};
