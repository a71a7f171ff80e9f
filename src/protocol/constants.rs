//! Protocol Constants

/// Delimiter terminating a control message: a blank line after the closing tag.
pub const MESSAGE_DELIMITER: &[u8] = b"\n\n";

/// Element injected into outbound print jobs.
pub const CUTMODE_ELEMENT: &str = "cutmode";

/// Default value for the injected cut directive.
pub const DEFAULT_CUT_MODE: &str = "full";

/// Top-level tag of the one message shape the relay rewrites.
pub const PRINT_TAG: &str = "print";

/// Child element of `<print>` declaring the length of the payload that follows.
pub const DATASIZE_ELEMENT: &str = "datasize";

/// Upper bound on a buffered control message. A stream that produces more
/// without a delimiter is not speaking the protocol.
pub const MAX_MESSAGE_BYTES: usize = 50_000;

/// Upper bound on a declared image payload (20 MB).
pub const MAX_PAYLOAD_BYTES: u64 = 20_000_000;
