//! Incremental RESP Decoder
//!
//! This module implements a streaming parser for RESP2 and RESP3 frames.
//! Zero-copy where it counts: bulk payloads are split out of the input
//! buffer as `Bytes` handles instead of being copied.
//!
//! ## Design Philosophy
//!
//! 1. **Cumulative**: network delivery chops frames arbitrarily, so the
//!    parser keeps its progress across calls. Aggregates are tracked on an
//!    explicit stack of open containers; completed elements are never
//!    re-parsed when more data arrives.
//! 2. **Atomic consumption**: an atom (one line, one blob, one aggregate
//!    header) is only consumed from the buffer once it is complete. A
//!    partial atom leaves the buffer untouched and the parser returns
//!    `Ok(None)`.
//! 3. **Guarded**: declared sizes are checked against the frame budget
//!    before any allocation, nesting depth is capped, and unterminated
//!    lines cannot grow without bound.
//! 4. **Fail-fast**: after the first protocol error the parser is poisoned
//!    and refuses further input. A broken stream has no trustworthy frame
//!    boundaries left, so the owning connection must be torn down.
//!
//! ## How Decoding Works
//!
//! ```text
//!  input buffer ──► parse one atom ──► scalar? ──► reduce into the
//!       ▲                │                         innermost open
//!       │                └── aggregate header? ──► push a new container
//!       │                                          frame on the stack
//!       └──────── Ok(None) when the next atom is still incomplete
//! ```
//!
//! `reduce` pushes a finished value into the innermost open container,
//! closing containers (and their parents) as their element counts fill up.
//! A value reduced with no container open is a complete top-level frame
//! and is handed to the caller.

use crate::buffer::ByteBuf;
use crate::codec::value::{is_valid_big_number, prefix, RespValue, CRLF};
use bytes::{Buf, Bytes};
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Errors that can occur while decoding RESP frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid double format
    #[error("invalid double: {0}")]
    InvalidDouble(String),

    /// Big number with anything but sign and digits
    #[error("invalid big number: {0}")]
    InvalidBigNumber(String),

    /// Boolean body other than `t` or `f`
    #[error("invalid boolean: {0}")]
    InvalidBoolean(String),

    /// Invalid UTF-8 in a line-oriented frame
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length where none is allowed
    #[error("invalid {kind} length: {len}")]
    InvalidLength { kind: &'static str, len: i64 },

    /// The frame exceeds the configured size budget
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Aggregate nesting beyond the supported depth
    #[error("nesting depth exceeded: {0}")]
    DepthExceeded(usize),

    /// Structural protocol violation (missing CRLF, malformed verbatim, ...)
    #[error("protocol violation: {0}")]
    Violation(String),

    /// The parser already failed on this stream
    #[error("decoder poisoned by a previous error")]
    Poisoned,

    /// Buffer-level failure while consuming a frame
    #[error("buffer error: {0}")]
    Buffer(#[from] crate::buffer::BufferError),
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, ProtocolError>;

/// Maximum size for a single decoded frame (512 MB, same as Redis)
pub const MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Maximum aggregate nesting depth (prevent unbounded stacks)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Maximum length of a single line-oriented frame or length header
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Cap on upfront element reservations for aggregates.
const RESERVE_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Array,
    Map,
    Set,
    Push,
    Attribute,
}

/// An open aggregate waiting for `remaining` more elements.
///
/// Maps and attributes count keys and values individually here; the
/// elements are paired up when the frame closes.
#[derive(Debug)]
struct Frame {
    kind: ContainerKind,
    remaining: usize,
    items: Vec<RespValue>,
}

impl Frame {
    fn finish(self) -> RespValue {
        match self.kind {
            ContainerKind::Array => RespValue::Array(self.items),
            ContainerKind::Set => RespValue::Set(self.items),
            ContainerKind::Push => RespValue::Push(self.items),
            ContainerKind::Map => RespValue::Map(pair_up(self.items)),
            ContainerKind::Attribute => RespValue::Attribute(pair_up(self.items)),
        }
    }
}

fn pair_up(items: Vec<RespValue>) -> Vec<(RespValue, RespValue)> {
    let mut entries = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        entries.push((k, v));
    }
    entries
}

/// One successfully consumed atom.
enum Step {
    /// A complete scalar (or RESP2 null sentinel).
    Value(RespValue),
    /// An aggregate header opening a container of `usize` elements.
    Open(ContainerKind, usize),
}

/// A streaming RESP2/RESP3 parser.
///
/// One parser instance belongs to one connection: it carries the decode
/// state of that stream between reads and must never be shared.
///
/// # Example
///
/// ```ignore
/// use wireline::buffer::ByteBuf;
/// use wireline::codec::RespParser;
///
/// let mut parser = RespParser::new();
/// let mut buf = ByteBuf::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
///
/// if let Some(value) = parser.decode(&mut buf)? {
///     println!("Decoded: {:?}", value);
/// }
/// ```
#[derive(Debug)]
pub struct RespParser {
    /// Open containers, innermost last
    stack: Vec<Frame>,
    /// Wire bytes consumed by the frame currently being decoded
    frame_bytes: usize,
    /// Budget for a single decoded frame
    max_frame_size: usize,
    /// Accept inline commands at the top level
    inline: bool,
    /// Set after the first error; all further input is rejected
    poisoned: bool,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default frame budget and inline decoding
    /// disabled.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            frame_bytes: 0,
            max_frame_size: MAX_FRAME_SIZE,
            inline: false,
            poisoned: false,
        }
    }

    /// Sets the frame size budget.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Enables inline command decoding at the top level.
    pub fn with_inline(mut self, enabled: bool) -> Self {
        self.inline = enabled;
        self
    }

    /// Attempts to decode one complete frame from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` - a complete frame was decoded and consumed
    /// - `Ok(None)` - incomplete data, call again after appending more
    /// - `Err(e)` - protocol error; the parser is now poisoned
    pub fn decode(&mut self, buf: &mut ByteBuf) -> DecodeResult<Option<RespValue>> {
        if self.poisoned {
            return Err(ProtocolError::Poisoned);
        }
        match self.decode_inner(buf) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn decode_inner(&mut self, buf: &mut ByteBuf) -> DecodeResult<Option<RespValue>> {
        loop {
            let step = match self.parse_step(buf)? {
                Some(step) => step,
                None => return Ok(None),
            };

            match step {
                Step::Value(value) => {
                    if let Some(complete) = self.reduce(value) {
                        return Ok(Some(complete));
                    }
                }
                Step::Open(kind, 0) => {
                    let empty = Frame {
                        kind,
                        remaining: 0,
                        items: Vec::new(),
                    }
                    .finish();
                    if let Some(complete) = self.reduce(empty) {
                        return Ok(Some(complete));
                    }
                }
                Step::Open(kind, count) => {
                    if self.stack.len() >= MAX_NESTING_DEPTH {
                        return Err(ProtocolError::DepthExceeded(MAX_NESTING_DEPTH));
                    }
                    self.stack.push(Frame {
                        kind,
                        remaining: count,
                        // clamp the reserve; the frame budget bounds real growth
                        items: Vec::with_capacity(count.min(RESERVE_LIMIT)),
                    });
                }
            }
        }
    }

    /// Folds a finished value into the innermost open container, closing
    /// containers as they fill. Returns the value if it completed a
    /// top-level frame.
    fn reduce(&mut self, value: RespValue) -> Option<RespValue> {
        let mut value = value;
        loop {
            let closed = match self.stack.last_mut() {
                None => {
                    self.frame_bytes = 0;
                    return Some(value);
                }
                Some(frame) => {
                    frame.items.push(value);
                    frame.remaining -= 1;
                    frame.remaining == 0
                }
            };
            if !closed {
                return None;
            }
            match self.stack.pop() {
                Some(frame) => value = frame.finish(),
                None => return None,
            }
        }
    }

    /// Consumes the next complete atom from the buffer, if any.
    fn parse_step(&mut self, buf: &mut ByteBuf) -> DecodeResult<Option<Step>> {
        let chunk = buf.chunk();
        if chunk.is_empty() {
            return Ok(None);
        }
        let prefix_byte = chunk[0];

        match prefix_byte {
            prefix::SIMPLE_STRING
            | prefix::ERROR
            | prefix::INTEGER
            | prefix::DOUBLE
            | prefix::BIG_NUMBER
            | prefix::BOOLEAN
            | prefix::NULL => self.parse_line(buf, prefix_byte),
            prefix::BULK_STRING | prefix::BULK_ERROR | prefix::VERBATIM => {
                self.parse_blob(buf, prefix_byte)
            }
            prefix::ARRAY | prefix::MAP | prefix::SET | prefix::PUSH | prefix::ATTRIBUTE => {
                self.parse_aggregate_header(buf, prefix_byte)
            }
            other => {
                if self.inline && self.stack.is_empty() {
                    self.parse_inline(buf)
                } else {
                    Err(ProtocolError::UnknownPrefix(other))
                }
            }
        }
    }

    /// Parses a line-oriented frame: `<prefix><content>\r\n`
    fn parse_line(&mut self, buf: &mut ByteBuf, prefix_byte: u8) -> DecodeResult<Option<Step>> {
        let (value, consumed) = {
            let chunk = buf.chunk();
            let body = &chunk[1..];
            let line_end = match find_crlf(body) {
                Some(pos) => pos,
                None => {
                    check_line_budget(chunk.len())?;
                    return Ok(None);
                }
            };
            let content = &body[..line_end];

            let value = match prefix_byte {
                prefix::SIMPLE_STRING => {
                    RespValue::SimpleString(parse_text(content, "simple string")?)
                }
                prefix::ERROR => RespValue::Error(parse_text(content, "error")?),
                prefix::INTEGER => RespValue::Integer(parse_i64(content)?),
                prefix::DOUBLE => RespValue::Double(parse_f64(content)?),
                prefix::BIG_NUMBER => {
                    let text = parse_text(content, "big number")?;
                    if !is_valid_big_number(&text) {
                        return Err(ProtocolError::InvalidBigNumber(text));
                    }
                    RespValue::BigNumber(text)
                }
                prefix::BOOLEAN => match content {
                    b"t" => RespValue::Boolean(true),
                    b"f" => RespValue::Boolean(false),
                    other => {
                        return Err(ProtocolError::InvalidBoolean(
                            String::from_utf8_lossy(other).into_owned(),
                        ))
                    }
                },
                prefix::NULL => {
                    if !content.is_empty() {
                        return Err(ProtocolError::Violation(
                            "null frame must have an empty body".to_string(),
                        ));
                    }
                    RespValue::Null
                }
                other => return Err(ProtocolError::UnknownPrefix(other)),
            };

            (value, 1 + line_end + 2)
        };

        self.consume(buf, consumed)?;
        Ok(Some(Step::Value(value)))
    }

    /// Parses a length-prefixed blob: `<prefix><length>\r\n<data>\r\n`
    fn parse_blob(&mut self, buf: &mut ByteBuf, prefix_byte: u8) -> DecodeResult<Option<Step>> {
        let (line_end, declared) = {
            let chunk = buf.chunk();
            let body = &chunk[1..];
            match find_crlf(body) {
                Some(pos) => (pos, parse_i64(&body[..pos])?),
                None => {
                    check_line_budget(chunk.len())?;
                    return Ok(None);
                }
            }
        };
        let header_len = 1 + line_end + 2;

        // RESP2 null bulk string
        if declared == -1 && prefix_byte == prefix::BULK_STRING {
            self.consume(buf, header_len)?;
            return Ok(Some(Step::Value(RespValue::Null)));
        }
        if declared < 0 {
            return Err(ProtocolError::InvalidLength {
                kind: blob_kind_name(prefix_byte),
                len: declared,
            });
        }
        let len = declared as usize;

        // Budget check comes before any allocation or waiting for payload.
        let projected = self.frame_bytes + header_len + len + 2;
        if projected > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: projected,
                max: self.max_frame_size,
            });
        }

        {
            let chunk = buf.chunk();
            if chunk.len() < header_len + len + 2 {
                return Ok(None);
            }
            if &chunk[header_len + len..header_len + len + 2] != CRLF {
                return Err(ProtocolError::Violation(
                    "blob missing trailing CRLF".to_string(),
                ));
            }
        }

        buf.skip(header_len)?;
        let data = buf.read_bytes(len)?;
        buf.skip(2)?;
        self.frame_bytes = projected;

        let value = match prefix_byte {
            prefix::BULK_STRING => RespValue::BulkString(data),
            prefix::BULK_ERROR => RespValue::BulkError(data),
            prefix::VERBATIM => {
                if data.len() < 4 || data[3] != b':' {
                    return Err(ProtocolError::Violation(
                        "verbatim payload must start with a three-character format and ':'"
                            .to_string(),
                    ));
                }
                RespValue::Verbatim {
                    format: [data[0], data[1], data[2]],
                    data: data.slice(4..),
                }
            }
            other => return Err(ProtocolError::UnknownPrefix(other)),
        };

        Ok(Some(Step::Value(value)))
    }

    /// Parses an aggregate header: `<prefix><count>\r\n`
    fn parse_aggregate_header(
        &mut self,
        buf: &mut ByteBuf,
        prefix_byte: u8,
    ) -> DecodeResult<Option<Step>> {
        let (line_end, declared) = {
            let chunk = buf.chunk();
            let body = &chunk[1..];
            match find_crlf(body) {
                Some(pos) => (pos, parse_i64(&body[..pos])?),
                None => {
                    check_line_budget(chunk.len())?;
                    return Ok(None);
                }
            }
        };
        let header_len = 1 + line_end + 2;

        // RESP2 null array
        if declared == -1 && prefix_byte == prefix::ARRAY {
            self.consume(buf, header_len)?;
            return Ok(Some(Step::Value(RespValue::Null)));
        }
        if declared < 0 {
            return Err(ProtocolError::InvalidLength {
                kind: aggregate_kind_name(prefix_byte),
                len: declared,
            });
        }
        let count = declared as usize;

        let kind = match prefix_byte {
            prefix::ARRAY => ContainerKind::Array,
            prefix::MAP => ContainerKind::Map,
            prefix::SET => ContainerKind::Set,
            prefix::PUSH => ContainerKind::Push,
            prefix::ATTRIBUTE => ContainerKind::Attribute,
            other => return Err(ProtocolError::UnknownPrefix(other)),
        };

        // Maps and attributes carry a key and a value per entry.
        let items = match kind {
            ContainerKind::Map | ContainerKind::Attribute => count.saturating_mul(2),
            _ => count,
        };

        // The smallest element is 3 wire bytes, so a count the budget can
        // never satisfy is rejected up front.
        let min_total = self.frame_bytes + header_len + items.saturating_mul(3);
        if min_total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: min_total,
                max: self.max_frame_size,
            });
        }

        self.consume(buf, header_len)?;
        Ok(Some(Step::Open(kind, items)))
    }

    /// Parses an inline command line into an array of bulk strings.
    fn parse_inline(&mut self, buf: &mut ByteBuf) -> DecodeResult<Option<Step>> {
        let (elements, consumed) = {
            let chunk = buf.chunk();
            let line_end = match find_crlf(chunk) {
                Some(pos) => pos,
                None => {
                    check_line_budget(chunk.len())?;
                    return Ok(None);
                }
            };
            let line = std::str::from_utf8(&chunk[..line_end])
                .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                return Err(ProtocolError::Violation("empty inline command".to_string()));
            }

            let elements: Vec<RespValue> = parts
                .into_iter()
                .map(|s| RespValue::BulkString(Bytes::from(s.to_string())))
                .collect();

            (elements, line_end + 2)
        };

        self.consume(buf, consumed)?;
        Ok(Some(Step::Value(RespValue::Array(elements))))
    }

    /// Consumes `len` bytes and charges them against the frame budget.
    fn consume(&mut self, buf: &mut ByteBuf, len: usize) -> DecodeResult<()> {
        buf.skip(len)?;
        self.frame_bytes += len;
        if self.frame_bytes > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: self.frame_bytes,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

fn parse_text(content: &[u8], what: &'static str) -> DecodeResult<String> {
    // A lone CR or LF cannot appear inside a line-oriented frame.
    if content.iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(ProtocolError::Violation(format!("CR or LF inside {}", what)));
    }
    std::str::from_utf8(content)
        .map(|s| s.to_string())
        .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))
}

fn parse_i64(content: &[u8]) -> DecodeResult<i64> {
    let s = std::str::from_utf8(content).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseIntError| ProtocolError::InvalidInteger(e.to_string()))
}

fn parse_f64(content: &[u8]) -> DecodeResult<f64> {
    let s = std::str::from_utf8(content).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseFloatError| ProtocolError::InvalidDouble(e.to_string()))
}

fn check_line_budget(buffered: usize) -> DecodeResult<()> {
    if buffered > MAX_LINE_LENGTH {
        return Err(ProtocolError::Violation(format!(
            "line exceeds {} bytes without a terminator",
            MAX_LINE_LENGTH
        )));
    }
    Ok(())
}

fn blob_kind_name(prefix_byte: u8) -> &'static str {
    match prefix_byte {
        prefix::BULK_ERROR => "bulk error",
        prefix::VERBATIM => "verbatim string",
        _ => "bulk string",
    }
}

fn aggregate_kind_name(prefix_byte: u8) -> &'static str {
    match prefix_byte {
        prefix::MAP => "map",
        prefix::SET => "set",
        prefix::PUSH => "push",
        prefix::ATTRIBUTE => "attribute",
        _ => "array",
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
    }
    None
}

/// Decodes a single frame from a byte slice.
///
/// This is a convenience function for simple use cases and tests; streams
/// should hold on to a [`RespParser`] instead.
pub fn decode_message(input: &[u8]) -> DecodeResult<Option<RespValue>> {
    let mut buf = ByteBuf::from(input);
    RespParser::new().decode(&mut buf)
}
