//! Control Message Parsing and Rewrite
//!
//! The control grammar is tiny and fixed: an optional XML declaration, one
//! top-level element, flat children with text content only, one element per
//! line. A minimal scanner for exactly that shape is used instead of a general
//! XML library. It is a real parser, not string splicing, so unexpected
//! characters in values cannot corrupt framing decisions.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, warn};

use super::constants::{CUTMODE_ELEMENT, DATASIZE_ELEMENT, PRINT_TAG};

/// Errors produced by the control-message scanner
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("malformed message: {0}")]
    Syntax(&'static str),

    #[error("mismatched tags: <{open}> closed by </{close}>")]
    MismatchedTag { open: String, close: String },
}

/// One parsed control message.
///
/// Children are kept in document order; order is meaningful because the
/// rewritten form must preserve it verbatim.
#[derive(Debug)]
pub struct ControlMessage {
    tag: String,
    children: Vec<(String, String)>,
    /// Byte offset of the closing `</tag>` in the raw message.
    close_tag_offset: usize,
}

impl ControlMessage {
    /// Parse a raw control message (delimiter included or not).
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(raw)?;
        let mut cursor = Cursor::new(text);

        cursor.skip_whitespace();
        if cursor.rest().starts_with("<?") {
            cursor.skip_declaration()?;
            cursor.skip_whitespace();
        }

        let tag = cursor.expect_open_tag()?;

        let mut children = Vec::new();
        loop {
            cursor.skip_whitespace();
            if cursor.rest().starts_with("</") {
                break;
            }
            let name = cursor.expect_open_tag()?;
            let value = cursor.read_text();
            let close = cursor.expect_close_tag()?;
            if close != name {
                return Err(ParseError::MismatchedTag {
                    open: name,
                    close,
                });
            }
            children.push((name, value));
        }

        let close_tag_offset = cursor.offset();
        let close = cursor.expect_close_tag()?;
        if close != tag {
            return Err(ParseError::MismatchedTag { open: tag, close });
        }

        if !cursor.rest().chars().all(char::is_whitespace) {
            return Err(ParseError::Syntax("trailing content after closing tag"));
        }

        Ok(Self {
            tag,
            children,
            close_tag_offset,
        })
    }

    /// Top-level tag name (`print`, `status`, ...).
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Child elements in document order.
    pub fn children(&self) -> &[(String, String)] {
        &self.children
    }

    /// Text content of the first child with the given name.
    pub fn child(&self, name: &str) -> Option<&str> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Declared payload length, 0 if absent or non-numeric.
    pub fn datasize(&self) -> u64 {
        self.child(DATASIZE_ELEMENT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Byte offset of the closing tag in the raw message.
    pub fn close_tag_offset(&self) -> usize {
        self.close_tag_offset
    }
}

/// Outcome of an inspect-and-possibly-rewrite step.
#[derive(Debug)]
pub struct Rewritten {
    /// Message bytes to forward to the printer.
    pub bytes: Bytes,
    /// Declared length of the payload segment that follows, 0 if none.
    pub datasize: u64,
}

/// Inspect a control message and inject the cut directive if it is a `print`
/// job that does not already carry one.
///
/// Anything else (a `status` message, a `print` that already has `cutmode`,
/// or a message the scanner cannot make sense of) is returned byte-identical.
/// Forwarding unrecognized messages unmodified is deliberate: dropping a job
/// whose shape the relay fails to parse would lose it silently.
pub fn maybe_rewrite(raw: Bytes, cut_mode: &str) -> Rewritten {
    let message = match ControlMessage::parse(&raw) {
        Ok(message) => message,
        Err(e) => {
            warn!("forwarding unparseable control message unmodified: {}", e);
            return Rewritten {
                bytes: raw,
                datasize: 0,
            };
        }
    };

    if message.tag() != PRINT_TAG {
        debug!(tag = message.tag(), "passing through non-print message");
        return Rewritten {
            bytes: raw,
            datasize: 0,
        };
    }

    let datasize = message.datasize();

    if message.child(CUTMODE_ELEMENT).is_some() {
        debug!("print message already carries cutmode, left untouched");
        return Rewritten {
            bytes: raw,
            datasize,
        };
    }

    // One insertion immediately before the closing tag; every other byte of
    // the original message is preserved.
    let insertion = format!("<{0}>{1}</{0}>\n", CUTMODE_ELEMENT, cut_mode);
    let offset = message.close_tag_offset();
    let mut out = BytesMut::with_capacity(raw.len() + insertion.len());
    out.extend_from_slice(&raw[..offset]);
    out.extend_from_slice(insertion.as_bytes());
    out.extend_from_slice(&raw[offset..]);

    debug!(datasize, cut_mode, "injected cut directive into print job");

    Rewritten {
        bytes: out.freeze(),
        datasize,
    }
}

/// Scanner cursor over the message text.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    /// Skip an `<?xml ...?>` declaration.
    fn skip_declaration(&mut self) -> Result<(), ParseError> {
        match self.rest().find("?>") {
            Some(end) => {
                self.pos += end + 2;
                Ok(())
            }
            None => Err(ParseError::Syntax("unterminated XML declaration")),
        }
    }

    /// Consume `<name>` and return the name.
    fn expect_open_tag(&mut self) -> Result<String, ParseError> {
        let rest = self.rest();
        if !rest.starts_with('<') {
            return Err(ParseError::Syntax("expected opening tag"));
        }
        let name = Self::take_tag_name(&rest[1..])?;
        let after = 1 + name.len();
        if !rest[after..].starts_with('>') {
            // Attributes are not part of this protocol.
            return Err(ParseError::Syntax("expected '>' after tag name"));
        }
        self.pos += after + 1;
        Ok(name)
    }

    /// Consume `</name>` and return the name.
    fn expect_close_tag(&mut self) -> Result<String, ParseError> {
        let rest = self.rest();
        if !rest.starts_with("</") {
            return Err(ParseError::Syntax("expected closing tag"));
        }
        let name = Self::take_tag_name(&rest[2..])?;
        let after = 2 + name.len();
        if !rest[after..].starts_with('>') {
            return Err(ParseError::Syntax("expected '>' after closing tag name"));
        }
        self.pos += after + 1;
        Ok(name)
    }

    /// Text content up to the next `<`. Values may not contain `<`.
    fn read_text(&mut self) -> String {
        let rest = self.rest();
        let end = rest.find('<').unwrap_or(rest.len());
        self.pos += end;
        rest[..end].to_string()
    }

    fn take_tag_name(s: &str) -> Result<String, ParseError> {
        let end = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(s.len());
        if end == 0 {
            return Err(ParseError::Syntax("empty tag name"));
        }
        Ok(s[..end].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINT_JOB: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
        <print>\n\
        <speed>3</speed>\n\
        <width>1280</width>\n\
        <height>1860</height>\n\
        <dataformat>rgb</dataformat>\n\
        <datasize>396324</datasize>\n\
        <quality>1</quality>\n\
        <copies>1</copies>\n\
        </print>\n\n";

    #[test]
    fn parses_print_job() {
        let message = ControlMessage::parse(PRINT_JOB.as_bytes()).unwrap();
        assert_eq!(message.tag(), "print");
        assert_eq!(message.children().len(), 7);
        assert_eq!(message.child("speed"), Some("3"));
        assert_eq!(message.child("copies"), Some("1"));
        assert_eq!(message.datasize(), 396324);
    }

    #[test]
    fn parses_status_message() {
        let raw = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
            <status>\n\
            <code>0</code>\n\
            <comment>ready to receive</comment>\n\
            </status>\n\n";
        let message = ControlMessage::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.tag(), "status");
        assert_eq!(message.child("code"), Some("0"));
        assert_eq!(message.child("comment"), Some("ready to receive"));
        assert_eq!(message.datasize(), 0);
    }

    #[test]
    fn rejects_mismatched_close_tag() {
        let raw = b"<print>\n<speed>3</width>\n</print>\n\n";
        assert!(matches!(
            ControlMessage::parse(raw),
            Err(ParseError::MismatchedTag { .. })
        ));
    }

    #[test]
    fn rejects_truncated_message() {
        let raw = b"<print>\n<speed>3</speed>\n";
        assert!(ControlMessage::parse(raw).is_err());
    }

    #[test]
    fn rejects_attributes() {
        let raw = b"<print version=\"2\">\n</print>\n\n";
        assert!(ControlMessage::parse(raw).is_err());
    }

    #[test]
    fn rewrite_inserts_cutmode_before_closing_tag() {
        let out = maybe_rewrite(Bytes::from_static(PRINT_JOB.as_bytes()), "full");
        assert_eq!(out.datasize, 396324);
        let text = std::str::from_utf8(&out.bytes).unwrap();
        assert!(text.contains("<cutmode>full</cutmode>\n</print>"));

        // Everything but the inserted line is byte-identical.
        let restored = text.replacen("<cutmode>full</cutmode>\n", "", 1);
        assert_eq!(restored, PRINT_JOB);
    }

    #[test]
    fn rewrite_keeps_sibling_order_and_appends_cutmode_last() {
        let out = maybe_rewrite(Bytes::from_static(PRINT_JOB.as_bytes()), "full");
        let rewritten = ControlMessage::parse(&out.bytes).unwrap();
        let names: Vec<&str> = rewritten
            .children()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "speed",
                "width",
                "height",
                "dataformat",
                "datasize",
                "quality",
                "copies",
                "cutmode"
            ]
        );
        let original = ControlMessage::parse(PRINT_JOB.as_bytes()).unwrap();
        for (name, value) in original.children() {
            assert_eq!(rewritten.child(name), Some(value.as_str()));
        }
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = maybe_rewrite(Bytes::from_static(PRINT_JOB.as_bytes()), "full");
        let twice = maybe_rewrite(once.bytes.clone(), "full");
        assert_eq!(once.bytes, twice.bytes);
        assert_eq!(twice.datasize, 396324);
    }

    #[test]
    fn rewrite_skips_status_messages() {
        let raw = Bytes::from_static(
            b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
              <status>\n<code>0</code>\n<comment>ready to receive</comment>\n</status>\n\n",
        );
        let out = maybe_rewrite(raw.clone(), "full");
        assert_eq!(out.bytes, raw);
        assert_eq!(out.datasize, 0);
    }

    #[test]
    fn rewrite_forwards_unparseable_bytes_unmodified() {
        let raw = Bytes::from_static(b"<print>\n<speed>3<oops\n\n");
        let out = maybe_rewrite(raw.clone(), "full");
        assert_eq!(out.bytes, raw);
        assert_eq!(out.datasize, 0);
    }

    #[test]
    fn rewrite_honors_configured_cut_mode() {
        let out = maybe_rewrite(Bytes::from_static(PRINT_JOB.as_bytes()), "half");
        let text = std::str::from_utf8(&out.bytes).unwrap();
        assert!(text.contains("<cutmode>half</cutmode>\n</print>"));
    }
}
