//! Growable Byte Buffer With Read/Write Cursors
//!
//! `ByteBuf` wraps a `BytesMut` and presents it as the classic two-cursor
//! buffer used by network stacks:
//!
//! ```text
//!        consumed            readable            writable
//!  ┌────────────────┬──────────────────────┬────────────────┐
//!  │ (reclaimed by  │  chunk() / peek()    │ ensure_writable│
//!  │  the allocator)│  read_bytes / skip   │ write_slice    │
//!  └────────────────┴──────────────────────┴────────────────┘
//!                   ▲                      ▲
//!              read cursor            write cursor
//! ```
//!
//! Reads never outrun writes: any attempt to consume more than `remaining()`
//! bytes fails with [`BufferError::IndexOutOfRange`] instead of handing out
//! garbage. Consumed bytes are reclaimed lazily by `BytesMut`, so a buffer
//! that is drained as fast as it fills stays at a stable capacity.
//!
//! ## Ownership Instead of Reference Counting
//!
//! Payload extraction goes through [`ByteBuf::read_bytes`], which splits the
//! requested span off as a `Bytes` handle sharing the same allocation. The
//! handle keeps the memory alive for as long as any clone exists and frees
//! it when the last one drops, so there is no manual retain/release to get
//! wrong: over-releasing is unrepresentable.

use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Default capacity for a fresh buffer.
const INITIAL_CAPACITY: usize = 4096;

/// Errors raised by out-of-range buffer reads.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// A read asked for more bytes than are currently readable.
    #[error("read of {requested} bytes out of range ({readable} readable)")]
    IndexOutOfRange { requested: usize, readable: usize },
}

/// A growable buffer with independent read and write positions.
///
/// # Example
///
/// ```ignore
/// use wireline::buffer::ByteBuf;
///
/// let mut buf = ByteBuf::new();
/// buf.write_slice(b"hello world");
///
/// let hello = buf.read_bytes(5)?;
/// assert_eq!(&hello[..], b"hello");
/// assert_eq!(buf.remaining(), 6);
/// ```
#[derive(Debug, Default)]
pub struct ByteBuf {
    inner: BytesMut,
}

impl ByteBuf {
    /// Creates an empty buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates an empty buffer that can hold `capacity` bytes before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends a slice, growing the buffer if needed.
    pub fn write_slice(&mut self, src: &[u8]) {
        self.inner.extend_from_slice(src);
    }

    /// Appends a single byte.
    pub fn write_u8(&mut self, byte: u8) {
        self.inner.put_u8(byte);
    }

    /// Makes room for at least `additional` more writable bytes.
    pub fn ensure_writable(&mut self, additional: usize) {
        self.inner.reserve(additional);
    }

    /// Splits off the first `len` readable bytes as a shared [`Bytes`] handle.
    ///
    /// This is zero-copy: the returned handle points into the same
    /// allocation as the buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, BufferError> {
        if len > self.remaining() {
            return Err(BufferError::IndexOutOfRange {
                requested: len,
                readable: self.remaining(),
            });
        }
        Ok(self.inner.split_to(len).freeze())
    }

    /// Splits off everything readable as a shared [`Bytes`] handle.
    pub fn take(&mut self) -> Bytes {
        self.inner.split().freeze()
    }

    /// Returns the first `len` readable bytes without consuming them,
    /// or `None` if fewer are available.
    pub fn peek(&self, len: usize) -> Option<&[u8]> {
        self.inner.get(..len)
    }

    /// Advances the read cursor by `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.remaining() {
            return Err(BufferError::IndexOutOfRange {
                requested: len,
                readable: self.remaining(),
            });
        }
        self.inner.advance(len);
        Ok(())
    }

    /// Discards all readable bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Number of readable bytes.
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }

    /// Number of bytes that can be written before the buffer grows.
    pub fn writable_bytes(&self) -> usize {
        self.inner.capacity() - self.inner.len()
    }

    /// Total capacity of the current allocation.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns true if there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&[u8]> for ByteBuf {
    fn from(src: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(src),
        }
    }
}

impl Buf for ByteBuf {
    fn remaining(&self) -> usize {
        self.inner.len()
    }

    fn chunk(&self) -> &[u8] {
        self.inner.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.inner.advance(cnt);
    }
}

unsafe impl BufMut for ByteBuf {
    fn remaining_mut(&self) -> usize {
        self.inner.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.inner.advance_mut(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.inner.chunk_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut buf = ByteBuf::new();
        buf.write_slice(b"hello world");
        assert_eq!(buf.remaining(), 11);

        let hello = buf.read_bytes(5).unwrap();
        assert_eq!(&hello[..], b"hello");
        assert_eq!(buf.remaining(), 6);
        assert_eq!(buf.chunk(), b" world");
    }

    #[test]
    fn test_read_past_end_is_rejected() {
        let mut buf = ByteBuf::from(&b"abc"[..]);
        let err = buf.read_bytes(4).unwrap_err();
        assert_eq!(
            err,
            BufferError::IndexOutOfRange {
                requested: 4,
                readable: 3,
            }
        );
        // The failed read must not move the cursor.
        assert_eq!(buf.remaining(), 3);
    }

    #[test]
    fn test_skip_bounds() {
        let mut buf = ByteBuf::from(&b"abcdef"[..]);
        buf.skip(2).unwrap();
        assert_eq!(buf.chunk(), b"cdef");
        assert!(buf.skip(5).is_err());
        assert_eq!(buf.remaining(), 4);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = ByteBuf::from(&b"abcdef"[..]);
        assert_eq!(buf.peek(3), Some(&b"abc"[..]));
        assert_eq!(buf.remaining(), 6);
        assert_eq!(buf.peek(7), None);
        buf.skip(6).unwrap();
        assert_eq!(buf.peek(1), None);
        assert_eq!(buf.peek(0), Some(&b""[..]));
    }

    #[test]
    fn test_read_bytes_is_zero_copy() {
        let mut buf = ByteBuf::new();
        buf.write_slice(b"payload");
        let base = buf.chunk().as_ptr();

        let payload = buf.read_bytes(7).unwrap();
        // The split handle points into the original allocation.
        assert_eq!(payload.as_ptr(), base);
    }

    #[test]
    fn test_shared_handles_keep_data_alive() {
        let mut buf = ByteBuf::new();
        buf.write_slice(b"shared");
        let a = buf.read_bytes(6).unwrap();
        let b = a.clone();
        drop(buf);
        drop(a);
        assert_eq!(&b[..], b"shared");
    }

    #[test]
    fn test_take_drains_everything() {
        let mut buf = ByteBuf::new();
        buf.write_slice(b"abc");
        buf.write_u8(b'd');
        let all = ByteBuf::take(&mut buf);
        assert_eq!(&all[..], b"abcd");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = ByteBuf::with_capacity(64);
        buf.write_slice(&[0u8; 32]);
        let cap = buf.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_ensure_writable_grows() {
        let mut buf = ByteBuf::with_capacity(8);
        buf.write_slice(&[0u8; 8]);
        assert_eq!(buf.writable_bytes(), 0);
        buf.ensure_writable(1024);
        assert!(buf.writable_bytes() >= 1024);
    }

    #[test]
    fn test_buf_mut_fills_directly() {
        // The BufMut impl is what lets `read_buf` style callers append
        // without an intermediate copy.
        let mut buf = ByteBuf::with_capacity(16);
        (&mut buf).put_slice(b"via bufmut");
        assert_eq!(buf.chunk(), b"via bufmut");
    }

    #[test]
    fn test_buf_advance() {
        let mut buf = ByteBuf::from(&b"0123456789"[..]);
        Buf::advance(&mut buf, 4);
        assert_eq!(buf.chunk(), b"456789");
        assert_eq!(Buf::remaining(&buf), 6);
    }

    #[test]
    fn test_interleaved_write_read() {
        let mut buf = ByteBuf::new();
        buf.write_slice(b"ab");
        assert_eq!(&buf.read_bytes(1).unwrap()[..], b"a");
        buf.write_slice(b"cd");
        assert_eq!(buf.chunk(), b"bcd");
        assert_eq!(&buf.read_bytes(3).unwrap()[..], b"bcd");
        assert!(buf.is_empty());
    }
}
