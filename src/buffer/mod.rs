//! Byte Buffer Primitives
//!
//! [`ByteBuf`] is the cursor-disciplined buffer the transport and codec
//! layers share: sockets fill it through [`bytes::BufMut`], the decoder
//! drains it through [`bytes::Buf`], and completed payloads split off as
//! reference-counted [`bytes::Bytes`] without copying.

mod byte_buf;

pub use byte_buf::{BufferError, ByteBuf};
