//! Channel driver
//!
//! One driver task per channel, spawned on the owning event loop. The
//! driver is the only code touching the socket; everything else reaches
//! the channel through commands or the pipeline.
//!
//! Each pass of the loop services, in priority order:
//!
//! 1. commands from handles (writes, close)
//! 2. flushing the outbound queue to the socket
//! 3. reading inbound bytes and firing them up the pipeline
//! 4. the idle deadline
//!
//! After every pipeline interaction the driver drains the pipeline sink:
//! encoded frames move to the write queue (updating writability across
//! the watermarks) and close requests move the channel into `Closing`.
//! A closing channel keeps flushing until its queue is empty, then tears
//! down; hard failures tear down immediately.

use crate::buffer::ByteBuf;
use crate::channel::{ChannelCommand, ChannelCore, ChannelState, TransportStats, WriteQueue};
use crate::config::Config;
use crate::error::{Error, TimeoutKind};
use crate::pipeline::{Pipeline, SinkOp};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Bytes requested from the socket per read pass.
const READ_CHUNK_SIZE: usize = 4096;

pub(crate) struct ChannelDriver {
    core: Arc<ChannelCore>,
    pipeline: Pipeline,
    cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    closed_tx: watch::Sender<bool>,
    config: Arc<Config>,
    stats: Arc<TransportStats>,
    on_exit: Option<Box<dyn FnOnce()>>,
}

impl ChannelDriver {
    pub(crate) fn new(
        core: Arc<ChannelCore>,
        pipeline: Pipeline,
        cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        closed_tx: watch::Sender<bool>,
        config: Arc<Config>,
        stats: Arc<TransportStats>,
        on_exit: Box<dyn FnOnce()>,
    ) -> Self {
        Self {
            core,
            pipeline,
            cmd_rx,
            closed_tx,
            config,
            stats,
            on_exit: Some(on_exit),
        }
    }

    pub(crate) async fn run(mut self, stream: TcpStream) {
        let id = self.core.id;

        self.core.set_state(ChannelState::Active);
        self.pipeline.fire_active();

        let (mut rd, mut wr) = stream.into_split();
        let mut read_buf = ByteBuf::with_capacity(READ_CHUNK_SIZE);
        let mut write_queue = WriteQueue::new(
            self.config.write_high_watermark,
            self.config.write_low_watermark,
        );
        let mut cmd_open = true;
        let mut last_activity = Instant::now();
        let mut reason = "closed";

        // fire_active may already have produced writes
        self.drain_sink(&mut write_queue);

        loop {
            if self.core.state() == ChannelState::Closing && write_queue.is_empty() {
                break;
            }

            let read_open = self.core.state() == ChannelState::Active;
            let idle_deadline = self.config.idle_timeout.map(|d| last_activity + d);

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv(), if cmd_open => match cmd {
                    Some(ChannelCommand::Write { msg, ack }) => {
                        last_activity = Instant::now();
                        if self.core.state() == ChannelState::Active {
                            self.pipeline.submit_write(msg, ack);
                        } else if let Some(ack) = ack {
                            let _ = ack.send(Err(Error::channel_closed()));
                        }
                    }
                    Some(ChannelCommand::Close) => {
                        self.pipeline.submit_close();
                    }
                    None => cmd_open = false,
                },

                result = write_front(&mut wr, &write_queue), if !write_queue.is_empty() => match result {
                    Ok(n) => {
                        last_activity = Instant::now();
                        self.stats.record_written(n as u64);
                        if let Some(writable) = write_queue.advance(n) {
                            self.core.set_writable(writable);
                            self.pipeline.fire_writability_changed(writable);
                        }
                    }
                    Err(e) => {
                        reason = "write error";
                        self.pipeline.fire_error(Error::Io(e));
                        self.drain_sink(&mut write_queue);
                        break;
                    }
                },

                result = read_chunk(&mut rd, &mut read_buf), if read_open => match result {
                    Ok(0) => {
                        reason = "peer closed";
                        // Stop reading; queued writes still flush.
                        self.core.set_state(ChannelState::Closing);
                    }
                    Ok(n) => {
                        last_activity = Instant::now();
                        self.stats.record_read(n as u64);
                        trace!(channel = %id, bytes = n, "read");
                        let data = read_buf.take();
                        self.pipeline.fire_read(Box::new(data));
                        self.pipeline.fire_read_complete();
                    }
                    Err(e) => {
                        reason = "read error";
                        self.pipeline.fire_error(Error::Io(e));
                        self.drain_sink(&mut write_queue);
                        break;
                    }
                },

                _ = sleep_until_opt(idle_deadline), if idle_deadline.is_some() => {
                    reason = "idle timeout";
                    self.pipeline.fire_error(Error::Timeout(TimeoutKind::Idle));
                    self.drain_sink(&mut write_queue);
                    break;
                }
            }

            self.drain_sink(&mut write_queue);
        }

        self.finish(wr, reason).await;
    }

    /// Moves pipeline sink output into the write queue and channel state.
    fn drain_sink(&mut self, write_queue: &mut WriteQueue) {
        while let Some(op) = self.pipeline.poll_sink() {
            match op {
                SinkOp::Write(bytes) => {
                    if let Some(writable) = write_queue.push(bytes) {
                        self.core.set_writable(writable);
                        self.pipeline.fire_writability_changed(writable);
                    }
                }
                SinkOp::Close => {
                    if self.core.state() == ChannelState::Active {
                        debug!(channel = %self.core.id, "close requested");
                        self.core.set_state(ChannelState::Closing);
                    }
                }
            }
        }
    }

    async fn finish(mut self, mut wr: OwnedWriteHalf, reason: &str) {
        let id = self.core.id;
        let peer = self.core.peer;

        let _ = wr.shutdown().await;
        self.core.set_state(ChannelState::Closed);
        self.core.set_writable(false);

        self.pipeline.fire_inactive();
        // The socket is gone; whatever inactive handlers emitted is
        // undeliverable.
        while self.pipeline.poll_sink().is_some() {}

        self.stats.record_close();
        let _ = self.closed_tx.send(true);
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
        debug!(channel = %id, peer = %peer, reason, "channel closed");
    }
}

async fn write_front(wr: &mut OwnedWriteHalf, queue: &WriteQueue) -> std::io::Result<usize> {
    match queue.front() {
        Some(bytes) => wr.write(bytes).await,
        // Unreachable under the select guard; park rather than return.
        None => std::future::pending().await,
    }
}

async fn read_chunk(rd: &mut OwnedReadHalf, buf: &mut ByteBuf) -> std::io::Result<usize> {
    buf.ensure_writable(READ_CHUNK_SIZE);
    rd.read_buf(buf).await
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
