//! Codec pipeline stages
//!
//! [`RespDecoder`] and [`RespEncoder`] adapt the codec to the pipeline:
//! the decoder cumulates raw socket bytes and replaces them with
//! [`RespValue`]s, the encoder turns outbound [`RespValue`]s into
//! wire-ready bytes. Each decoder owns its own parser, so the decode
//! state of one connection can never bleed into another.

use crate::buffer::ByteBuf;
use crate::codec::encoder;
use crate::codec::parser::RespParser;
use crate::codec::value::RespValue;
use crate::config::Config;
use crate::error::Error;
use crate::pipeline::{Caps, Context, Handler, Message};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Inbound stage: raw bytes in, decoded [`RespValue`]s out.
///
/// Fires one read per complete frame, in wire order. On a protocol error
/// the decoder reports the error inbound and goes dead; a stream without
/// trustworthy frame boundaries cannot be resynchronized.
#[derive(Debug)]
pub struct RespDecoder {
    cumulation: ByteBuf,
    parser: RespParser,
    failed: bool,
}

impl RespDecoder {
    pub fn new(config: &Config) -> Self {
        Self {
            cumulation: ByteBuf::new(),
            parser: RespParser::new()
                .with_max_frame_size(config.max_frame_size)
                .with_inline(config.decode_inline),
            failed: false,
        }
    }
}

impl Default for RespDecoder {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Handler for RespDecoder {
    fn capabilities(&self) -> Caps {
        Caps::INBOUND
    }

    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
        let bytes = match msg.downcast::<Bytes>() {
            Ok(bytes) => *bytes,
            // Not ours; some earlier stage already produced typed
            // messages.
            Err(other) => return ctx.fire_read(other),
        };
        if self.failed {
            return;
        }

        self.cumulation.write_slice(&bytes);
        loop {
            match self.parser.decode(&mut self.cumulation) {
                Ok(Some(value)) => ctx.fire_read(Box::new(value)),
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        channel = %ctx.channel_id(),
                        error = %e,
                        "protocol error while decoding"
                    );
                    self.failed = true;
                    ctx.fire_error(Error::Protocol(e));
                    break;
                }
            }
        }
    }

    fn on_inactive(&mut self, ctx: &mut Context<'_>) {
        if !self.cumulation.is_empty() {
            debug!(
                channel = %ctx.channel_id(),
                leftover = self.cumulation.remaining(),
                "channel closed mid-frame"
            );
        }
        ctx.fire_inactive();
    }
}

/// Outbound stage: [`RespValue`]s in, wire-ready bytes out.
///
/// Encoding failures fail the offending write and nothing else; the
/// channel stays open.
#[derive(Debug, Default)]
pub struct RespEncoder {
    scratch: BytesMut,
}

impl RespEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Handler for RespEncoder {
    fn capabilities(&self) -> Caps {
        Caps::OUTBOUND
    }

    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Message) -> Result<(), Error> {
        let value = match msg.downcast::<RespValue>() {
            Ok(value) => value,
            // Already wire-shaped (or someone else's business).
            Err(other) => {
                ctx.forward_write(other);
                return Ok(());
            }
        };

        let start = self.scratch.len();
        match encoder::encode(&value, &mut self.scratch) {
            Ok(()) => {
                let frame = self.scratch.split().freeze();
                ctx.forward_write(Box::new(frame));
                Ok(())
            }
            Err(e) => {
                // Drop the partial frame so the next write starts clean.
                self.scratch.truncate(start);
                Err(Error::Encode(e))
            }
        }
    }
}
