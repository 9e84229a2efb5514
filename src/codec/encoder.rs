//! RESP Frame Encoder
//!
//! Serializes [`RespValue`] trees into their RESP3 wire form. Encoding is
//! infallible for well-formed values; the error cases exist because the
//! value tree is a public type and callers can build frames the wire
//! format cannot carry (a simple string with an embedded CRLF, a big
//! number with letters in it).
//!
//! Encoding always emits RESP3: `Null` becomes `_\r\n`, never the RESP2
//! `$-1\r\n` sentinel. Peers that negotiated RESP2 receive RESP2 frames
//! only for types that exist there, which the caller controls by not
//! building RESP3-only values.

use crate::codec::parser::MAX_NESTING_DEPTH;
use crate::codec::value::{prefix, RespValue, CRLF};
use bytes::BytesMut;
use thiserror::Error;

/// Errors that can occur while encoding a [`RespValue`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Line-oriented frames cannot contain CR or LF
    #[error("CR or LF inside {0}")]
    EmbeddedCrlf(&'static str),

    /// Big number with anything but sign and digits
    #[error("invalid big number: {0}")]
    InvalidBigNumber(String),

    /// Aggregate nesting beyond the supported depth
    #[error("nesting depth exceeded: {0}")]
    DepthExceeded(usize),

    /// The outbound message type has no wire representation
    #[error("message type cannot be encoded for the wire")]
    UnsupportedMessage,
}

/// Encodes a value into `dst` in RESP3 wire format.
///
/// On error `dst` may contain a partially written frame; callers that
/// reuse a scratch buffer should truncate it back to its pre-call length.
pub fn encode(value: &RespValue, dst: &mut BytesMut) -> Result<(), EncodeError> {
    encode_value(value, dst, 0)
}

fn encode_value(value: &RespValue, dst: &mut BytesMut, depth: usize) -> Result<(), EncodeError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(EncodeError::DepthExceeded(MAX_NESTING_DEPTH));
    }

    match value {
        RespValue::SimpleString(s) => {
            check_line(s, "simple string")?;
            put_line(dst, prefix::SIMPLE_STRING, s.as_bytes());
        }
        RespValue::Error(msg) => {
            check_line(msg, "error")?;
            put_line(dst, prefix::ERROR, msg.as_bytes());
        }
        RespValue::Integer(n) => {
            put_line(dst, prefix::INTEGER, n.to_string().as_bytes());
        }
        RespValue::BulkString(data) => {
            put_blob(dst, prefix::BULK_STRING, data);
        }
        RespValue::Null => {
            dst.extend_from_slice(&[prefix::NULL]);
            dst.extend_from_slice(CRLF);
        }
        RespValue::Boolean(b) => {
            let body: &[u8] = if *b { b"t" } else { b"f" };
            put_line(dst, prefix::BOOLEAN, body);
        }
        RespValue::Double(d) => {
            put_line(dst, prefix::DOUBLE, format_double(*d).as_bytes());
        }
        RespValue::BigNumber(digits) => {
            if !crate::codec::value::is_valid_big_number(digits) {
                return Err(EncodeError::InvalidBigNumber(digits.clone()));
            }
            put_line(dst, prefix::BIG_NUMBER, digits.as_bytes());
        }
        RespValue::BulkError(data) => {
            put_blob(dst, prefix::BULK_ERROR, data);
        }
        RespValue::Verbatim { format, data } => {
            put_header(dst, prefix::VERBATIM, data.len() + 4);
            dst.extend_from_slice(format);
            dst.extend_from_slice(b":");
            dst.extend_from_slice(data);
            dst.extend_from_slice(CRLF);
        }
        RespValue::Array(items) => {
            put_header(dst, prefix::ARRAY, items.len());
            for item in items {
                encode_value(item, dst, depth + 1)?;
            }
        }
        RespValue::Set(items) => {
            put_header(dst, prefix::SET, items.len());
            for item in items {
                encode_value(item, dst, depth + 1)?;
            }
        }
        RespValue::Push(items) => {
            put_header(dst, prefix::PUSH, items.len());
            for item in items {
                encode_value(item, dst, depth + 1)?;
            }
        }
        RespValue::Map(entries) => {
            put_header(dst, prefix::MAP, entries.len());
            for (key, val) in entries {
                encode_value(key, dst, depth + 1)?;
                encode_value(val, dst, depth + 1)?;
            }
        }
        RespValue::Attribute(entries) => {
            put_header(dst, prefix::ATTRIBUTE, entries.len());
            for (key, val) in entries {
                encode_value(key, dst, depth + 1)?;
                encode_value(val, dst, depth + 1)?;
            }
        }
    }

    Ok(())
}

fn check_line(content: &str, what: &'static str) -> Result<(), EncodeError> {
    if content.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(EncodeError::EmbeddedCrlf(what));
    }
    Ok(())
}

/// `inf`, `-inf` and `nan` per the published grammar; Rust's `Display`
/// agrees on the infinities but capitalizes NaN.
fn format_double(d: f64) -> String {
    if d.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", d)
    }
}

fn put_line(dst: &mut BytesMut, prefix_byte: u8, content: &[u8]) {
    dst.extend_from_slice(&[prefix_byte]);
    dst.extend_from_slice(content);
    dst.extend_from_slice(CRLF);
}

fn put_header(dst: &mut BytesMut, prefix_byte: u8, len: usize) {
    dst.extend_from_slice(&[prefix_byte]);
    dst.extend_from_slice(len.to_string().as_bytes());
    dst.extend_from_slice(CRLF);
}

fn put_blob(dst: &mut BytesMut, prefix_byte: u8, data: &[u8]) {
    put_header(dst, prefix_byte, data.len());
    dst.extend_from_slice(data);
    dst.extend_from_slice(CRLF);
}
