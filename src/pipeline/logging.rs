//! Pipeline traffic logging

use crate::codec::RespValue;
use crate::error::Error;
use crate::pipeline::{Caps, Context, Handler, Message};
use bytes::Bytes;
use tracing::{debug, warn};

/// Logs every event passing its position in the pipeline, then forwards
/// it unchanged. Place it below the codec to see raw bytes, above it to
/// see decoded values.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl LoggingHandler {
    pub fn new() -> Self {
        LoggingHandler
    }
}

fn describe(msg: &Message) -> String {
    if let Some(bytes) = msg.downcast_ref::<Bytes>() {
        format!("{} raw bytes", bytes.len())
    } else if let Some(value) = msg.downcast_ref::<RespValue>() {
        value.type_name().to_string()
    } else {
        "opaque message".to_string()
    }
}

impl Handler for LoggingHandler {
    fn capabilities(&self) -> Caps {
        Caps::DUPLEX
    }

    fn on_active(&mut self, ctx: &mut Context<'_>) {
        debug!(channel = %ctx.channel_id(), peer = %ctx.peer_addr(), "channel active");
        ctx.fire_active();
    }

    fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
        debug!(channel = %ctx.channel_id(), msg = %describe(&msg), "read");
        ctx.fire_read(msg);
    }

    fn on_writability_changed(&mut self, ctx: &mut Context<'_>, writable: bool) {
        debug!(channel = %ctx.channel_id(), writable, "writability changed");
        ctx.fire_writability_changed(writable);
    }

    fn on_error(&mut self, ctx: &mut Context<'_>, error: Error) {
        warn!(channel = %ctx.channel_id(), error = %error, "pipeline error");
        ctx.fire_error(error);
    }

    fn on_inactive(&mut self, ctx: &mut Context<'_>) {
        debug!(channel = %ctx.channel_id(), "channel inactive");
        ctx.fire_inactive();
    }

    fn on_write(&mut self, ctx: &mut Context<'_>, msg: Message) -> Result<(), Error> {
        debug!(channel = %ctx.channel_id(), msg = %describe(&msg), "write");
        ctx.forward_write(msg);
        Ok(())
    }
}
