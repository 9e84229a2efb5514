//! RESP2/RESP3 Codec
//!
//! Wire format support in three layers:
//!
//! - [`RespValue`]: the decoded value tree for both protocol generations
//! - [`RespParser`] / [`encode`]: the streaming decoder and the encoder
//! - [`RespDecoder`] / [`RespEncoder`]: pipeline stages wrapping them
//!
//! The parser is incremental: feed it whatever the socket delivered and
//! it returns complete frames as they become available, keeping partial
//! state between calls. Splitting the input at any byte boundary decodes
//! to the same values.

mod encoder;
mod handler;
mod parser;
mod value;

pub use encoder::{encode, EncodeError};
pub use handler::{RespDecoder, RespEncoder};
pub use parser::{
    decode_message, DecodeResult, ProtocolError, RespParser, MAX_FRAME_SIZE, MAX_LINE_LENGTH,
    MAX_NESTING_DEPTH,
};
pub use value::{prefix, RespValue, CRLF};
