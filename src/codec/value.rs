//! RESP Wire Values
//!
//! This module defines the value tree shared by the decoder and encoder.
//! It covers both protocol generations: the five classic RESP2 types and
//! the RESP3 extensions negotiated by `HELLO 3`.
//!
//! ## Type Prefixes
//!
//! Every frame starts with a one-byte prefix and ends with CRLF (`\r\n`):
//!
//! | Prefix | Type          | Example                  |
//! |--------|---------------|--------------------------|
//! | `+`    | Simple string | `+OK\r\n`                |
//! | `-`    | Error         | `-ERR bad command\r\n`   |
//! | `:`    | Integer       | `:1000\r\n`              |
//! | `$`    | Bulk string   | `$5\r\nhello\r\n`        |
//! | `*`    | Array         | `*1\r\n:1\r\n`           |
//! | `_`    | Null          | `_\r\n`                  |
//! | `#`    | Boolean       | `#t\r\n`                 |
//! | `,`    | Double        | `,3.14\r\n`              |
//! | `(`    | Big number    | `(3492890328409238\r\n`  |
//! | `!`    | Bulk error    | `!9\r\nERR oops!\r\n`    |
//! | `=`    | Verbatim      | `=8\r\ntxt:abcd\r\n`     |
//! | `%`    | Map           | `%1\r\n+k\r\n+v\r\n`     |
//! | `~`    | Set           | `~1\r\n:1\r\n`           |
//! | `>`    | Push          | `>2\r\n+pubsub\r\n:1\r\n`|
//! | `\|`   | Attribute     | `\|1\r\n+ttl\r\n:3\r\n`  |
//!
//! RESP2 peers encode null as `$-1\r\n` or `*-1\r\n`; the decoder folds
//! both into [`RespValue::Null`].

use crate::codec::encoder::{self, EncodeError};
use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by the wire format
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const NULL: u8 = b'_';
    pub const BOOLEAN: u8 = b'#';
    pub const DOUBLE: u8 = b',';
    pub const BIG_NUMBER: u8 = b'(';
    pub const BULK_ERROR: u8 = b'!';
    pub const VERBATIM: u8 = b'=';
    pub const MAP: u8 = b'%';
    pub const SET: u8 = b'~';
    pub const PUSH: u8 = b'>';
    pub const ATTRIBUTE: u8 = b'|';
}

/// A decoded RESP2/RESP3 value.
///
/// Map-shaped variants keep their entries as ordered pairs: the protocol
/// transmits entries in order and keys may themselves be aggregates, so a
/// hash map would fit neither the semantics nor the key types.
///
/// `Double` carries an `f64`, which is why this type implements `PartialEq`
/// but not `Eq`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Non-binary-safe string without CR or LF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error with the same shape as a simple string.
    /// Format: `-<message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// The null value. Encoded as `_\r\n`; also decoded from the RESP2
    /// sentinels `$-1\r\n` and `*-1\r\n`.
    Null,

    /// Boolean.
    /// Format: `#t\r\n` or `#f\r\n`
    Boolean(bool),

    /// Double precision float, including `inf`, `-inf` and `nan`.
    /// Format: `,<number>\r\n`
    Double(f64),

    /// Arbitrary precision integer, kept as its decimal digits.
    /// Format: `(<digits>\r\n`
    BigNumber(String),

    /// Binary-safe error.
    /// Format: `!<length>\r\n<data>\r\n`
    BulkError(Bytes),

    /// Verbatim string tagged with a three-character format such as `txt`.
    /// Format: `=<length>\r\n<fmt>:<data>\r\n`
    Verbatim { format: [u8; 3], data: Bytes },

    /// Ordered sequence of values, possibly nested.
    /// Format: `*<count>\r\n<element>...`
    Array(Vec<RespValue>),

    /// Ordered key-value pairs.
    /// Format: `%<pairs>\r\n<key><value>...`
    Map(Vec<(RespValue, RespValue)>),

    /// Unordered collection on the wire, decoded in arrival order.
    /// Format: `~<count>\r\n<element>...`
    Set(Vec<RespValue>),

    /// Out-of-band server push (pub/sub traffic, invalidation, ...).
    /// Format: `><count>\r\n<element>...`
    Push(Vec<RespValue>),

    /// Auxiliary metadata frame preceding a reply.
    /// Format: `|<pairs>\r\n<key><value>...`
    Attribute(Vec<(RespValue, RespValue)>),
}

impl RespValue {
    /// Creates a simple string value.
    ///
    /// # Example
    /// ```ignore
    /// use wireline::codec::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error value.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates an integer value.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string value.
    ///
    /// # Example
    /// ```ignore
    /// use wireline::codec::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates the null value.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates a boolean value.
    pub fn boolean(b: bool) -> Self {
        RespValue::Boolean(b)
    }

    /// Creates a double value.
    pub fn double(d: f64) -> Self {
        RespValue::Double(d)
    }

    /// Creates a big number from its decimal representation.
    pub fn big_number(digits: impl Into<String>) -> Self {
        RespValue::BigNumber(digits.into())
    }

    /// Creates a bulk error value.
    pub fn bulk_error(data: impl Into<Bytes>) -> Self {
        RespValue::BulkError(data.into())
    }

    /// Creates a verbatim string value.
    pub fn verbatim(format: [u8; 3], data: impl Into<Bytes>) -> Self {
        RespValue::Verbatim {
            format,
            data: data.into(),
        }
    }

    /// Creates an array value.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Creates a map value from ordered pairs.
    pub fn map(entries: Vec<(RespValue, RespValue)>) -> Self {
        RespValue::Map(entries)
    }

    /// Creates a set value.
    pub fn set(values: Vec<RespValue>) -> Self {
        RespValue::Set(values)
    }

    /// Creates a push value.
    pub fn push(values: Vec<RespValue>) -> Self {
        RespValue::Push(values)
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common response for PONG
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Encodes this value into its wire representation.
    ///
    /// Convenience wrapper around [`encoder::encode`] for one-off values;
    /// steady-state encoding should reuse a buffer instead.
    pub fn to_bytes(&self) -> Result<Bytes, EncodeError> {
        let mut buf = bytes::BytesMut::new();
        encoder::encode(self, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this value is an error or bulk error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_) | RespValue::BulkError(_))
    }

    /// Returns true if this value is a server push.
    pub fn is_push(&self) -> bool {
        matches!(self, RespValue::Push(_))
    }

    /// Attempts to view this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            RespValue::Verbatim { data, .. } => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    /// Attempts to view this value as raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) | RespValue::BulkError(b) => Some(b),
            RespValue::Verbatim { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract the inner double.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            RespValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Attempts to extract the inner boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RespValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to view the elements of an array, set or push.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(v) | RespValue::Set(v) | RespValue::Push(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to view the entries of a map or attribute.
    pub fn as_map(&self) -> Option<&[(RespValue, RespValue)]> {
        match self {
            RespValue::Map(entries) | RespValue::Attribute(entries) => Some(entries),
            _ => None,
        }
    }

    /// Consumes self and returns the elements if this is a sequence variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(v) | RespValue::Set(v) | RespValue::Push(v) => Some(v),
            _ => None,
        }
    }

    /// Protocol name of this value's type, for logs and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(_) => "bulk string",
            RespValue::Null => "null",
            RespValue::Boolean(_) => "boolean",
            RespValue::Double(_) => "double",
            RespValue::BigNumber(_) => "big number",
            RespValue::BulkError(_) => "bulk error",
            RespValue::Verbatim { .. } => "verbatim string",
            RespValue::Array(_) => "array",
            RespValue::Map(_) => "map",
            RespValue::Set(_) => "set",
            RespValue::Push(_) => "push",
            RespValue::Attribute(_) => "attribute",
        }
    }
}

/// Returns true if `s` is a well-formed big number: an optional sign
/// followed by at least one ASCII digit.
pub(crate) fn is_valid_big_number(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => write_blob(f, data),
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Boolean(b) => write!(f, "({})", b),
            RespValue::Double(d) => write!(f, "(double) {}", d),
            RespValue::BigNumber(s) => write!(f, "(big number) {}", s),
            RespValue::BulkError(data) => {
                write!(f, "(error) ")?;
                write_blob(f, data)
            }
            RespValue::Verbatim { data, .. } => write_blob(f, data),
            RespValue::Array(values) => write_sequence(f, values, ""),
            RespValue::Set(values) => write_sequence(f, values, "~"),
            RespValue::Push(values) => write_sequence(f, values, ">"),
            RespValue::Map(entries) => write_entries(f, entries, "(empty map)"),
            RespValue::Attribute(entries) => write_entries(f, entries, "(empty attribute)"),
        }
    }
}

fn write_blob(f: &mut fmt::Formatter<'_>, data: &Bytes) -> fmt::Result {
    if let Ok(s) = std::str::from_utf8(data) {
        write!(f, "\"{}\"", s)
    } else {
        write!(f, "(binary data, {} bytes)", data.len())
    }
}

fn write_sequence(f: &mut fmt::Formatter<'_>, values: &[RespValue], marker: &str) -> fmt::Result {
    if values.is_empty() {
        return write!(f, "(empty)");
    }
    writeln!(f)?;
    for (i, v) in values.iter().enumerate() {
        writeln!(f, "{}{}) {}", marker, i + 1, v)?;
    }
    Ok(())
}

fn write_entries(
    f: &mut fmt::Formatter<'_>,
    entries: &[(RespValue, RespValue)],
    empty: &str,
) -> fmt::Result {
    if entries.is_empty() {
        return write!(f, "{}", empty);
    }
    writeln!(f)?;
    for (i, (k, v)) in entries.iter().enumerate() {
        writeln!(f, "{}) {} => {}", i + 1, k, v)?;
    }
    Ok(())
}
