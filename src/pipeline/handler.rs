//! Handler trait and capability flags
//!
//! A handler declares which directions it participates in through
//! [`Caps`] instead of implementing direction-specific traits. The
//! pipeline skips a handler entirely for events outside its declared
//! capabilities, so a decoder never sees writes and an encoder never
//! sees reads.
//!
//! Every method has a forwarding default: implement only the events you
//! care about. Handlers run on their channel's event loop thread and are
//! never called concurrently, which is why the trait requires neither
//! `Send` nor interior mutability.

use crate::error::Error;
use crate::pipeline::Context;
use std::any::Any;
use std::ops::BitOr;

/// A type-erased message traveling through a pipeline.
///
/// Inbound, the transport produces [`Bytes`](bytes::Bytes) and decoders
/// replace them with richer types. Outbound, handlers reduce messages
/// back down to `Bytes` before they reach the socket.
pub type Message = Box<dyn Any + Send>;

/// Direction capabilities of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps(u8);

impl Caps {
    /// Receives inbound events (reads, errors, lifecycle).
    pub const INBOUND: Caps = Caps(0b01);
    /// Receives outbound operations (writes, close).
    pub const OUTBOUND: Caps = Caps(0b10);
    /// Both directions.
    pub const DUPLEX: Caps = Caps(0b11);

    pub fn handles_inbound(self) -> bool {
        self.0 & Caps::INBOUND.0 != 0
    }

    pub fn handles_outbound(self) -> bool {
        self.0 & Caps::OUTBOUND.0 != 0
    }
}

impl BitOr for Caps {
    type Output = Caps;

    fn bitor(self, rhs: Caps) -> Caps {
        Caps(self.0 | rhs.0)
    }
}

/// A stage in a channel's pipeline.
///
/// Capabilities are sampled once, when the handler is added.
///
/// # Example
///
/// ```ignore
/// use wireline::pipeline::{Caps, Context, Handler, Message};
///
/// struct PingResponder;
///
/// impl Handler for PingResponder {
///     fn capabilities(&self) -> Caps {
///         Caps::INBOUND
///     }
///
///     fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
///         match msg.downcast::<RespValue>() {
///             Ok(value) if value.as_str() == Some("PING") => {
///                 ctx.write(Box::new(RespValue::pong()));
///             }
///             Ok(value) => ctx.fire_read(value),
///             Err(other) => ctx.fire_read(other),
///         }
///     }
/// }
/// ```
pub trait Handler {
    /// Which event directions this handler participates in.
    fn capabilities(&self) -> Caps;

    /// The channel became active and I/O is flowing.
    fn on_active(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_active();
    }

    /// A message arrived from the previous inbound stage.
    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
        ctx.fire_read(msg);
    }

    /// The current read burst is over; a good moment to flush batches.
    fn on_read_complete(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_read_complete();
    }

    /// The channel's writability flipped (outbound queue crossed a
    /// watermark).
    fn on_writability_changed(&mut self, ctx: &mut Context<'_>, writable: bool) {
        ctx.fire_writability_changed(writable);
    }

    /// An error traveling inbound. Unhandled errors reach the tail and
    /// close the channel.
    fn on_error(&mut self, ctx: &mut Context<'_>, error: Error) {
        ctx.fire_error(error);
    }

    /// The channel is gone. Last event a handler ever sees.
    fn on_inactive(&mut self, ctx: &mut Context<'_>) {
        ctx.fire_inactive();
    }

    /// An outbound message from a later stage (or from a
    /// [`ChannelHandle`](crate::channel::ChannelHandle)).
    ///
    /// Returning an error fails that write's acknowledgment without
    /// closing the channel. Forward with [`Context::forward_write`] to
    /// keep the write's acknowledgment attached.
    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Message) -> Result<(), Error> {
        ctx.forward_write(msg);
        Ok(())
    }

    /// A close request traveling toward the transport.
    fn on_close(&mut self, ctx: &mut Context<'_>) {
        ctx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_directions() {
        assert!(Caps::INBOUND.handles_inbound());
        assert!(!Caps::INBOUND.handles_outbound());
        assert!(Caps::OUTBOUND.handles_outbound());
        assert!(!Caps::OUTBOUND.handles_inbound());
        assert!(Caps::DUPLEX.handles_inbound());
        assert!(Caps::DUPLEX.handles_outbound());
    }

    #[test]
    fn test_caps_combine() {
        let combined = Caps::INBOUND | Caps::OUTBOUND;
        assert_eq!(combined, Caps::DUPLEX);
    }
}
