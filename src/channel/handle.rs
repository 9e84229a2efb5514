//! Channel identity and the cloneable handle
//!
//! A channel is owned and driven by exactly one event loop. Everything
//! other code holds is a [`ChannelHandle`]: a cheap clone that carries
//! the channel's identity, observes its state, and submits work to the
//! owning loop over a command queue. The handle is `Send`, the channel
//! itself never is.

use crate::error::Error;
use crate::pipeline::Message;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a channel.
///
/// State only moves forward: `Unregistered` → `Active` → `Closing` →
/// `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created but not yet running on its event loop
    Unregistered,
    /// Registered and processing I/O
    Active,
    /// Close requested; flushing queued writes
    Closing,
    /// Fully torn down
    Closed,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ChannelState::Unregistered,
            1 => ChannelState::Active,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Unregistered => 0,
            ChannelState::Active => 1,
            ChannelState::Closing => 2,
            ChannelState::Closed => 3,
        }
    }
}

/// State shared between a channel's driver, its pipeline and all handles.
#[derive(Debug)]
pub(crate) struct ChannelCore {
    pub(crate) id: ChannelId,
    pub(crate) peer: SocketAddr,
    state: AtomicU8,
    writable: AtomicBool,
}

impl ChannelCore {
    pub(crate) fn new(peer: SocketAddr) -> Self {
        Self {
            id: ChannelId::next(),
            peer,
            state: AtomicU8::new(ChannelState::Unregistered.as_u8()),
            writable: AtomicBool::new(true),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state() == ChannelState::Active
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    pub(crate) fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }
}

/// Work submitted to a channel's driver.
pub(crate) enum ChannelCommand {
    Write {
        msg: Message,
        ack: Option<oneshot::Sender<Result<(), Error>>>,
    },
    Close,
}

/// A cloneable, thread-safe reference to a channel.
///
/// # Example
///
/// ```ignore
/// use wireline::codec::RespValue;
///
/// let reply = channel.write(RespValue::ok()).await?;
/// channel.close();
/// channel.closed().await;
/// ```
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    core: Arc<ChannelCore>,
    cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
    closed_rx: watch::Receiver<bool>,
}

impl ChannelHandle {
    pub(crate) fn new(
        core: Arc<ChannelCore>,
        cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
        closed_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            core,
            cmd_tx,
            closed_rx,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.core.peer
    }

    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// True while the channel is registered and not closing.
    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// False while the outbound queue sits above the high watermark.
    /// Writes are still accepted; well-behaved producers back off.
    pub fn is_writable(&self) -> bool {
        self.core.is_writable()
    }

    /// Sends a message through the channel's pipeline and waits until it
    /// reaches the socket queue.
    ///
    /// Resolves `Ok` once every outbound handler accepted the message and
    /// its encoded form was queued for the wire. An error from an
    /// outbound handler (an unencodable value, for instance) fails this
    /// write only; the channel stays open.
    pub async fn write<M: Send + 'static>(&self, msg: M) -> Result<(), Error> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(ChannelCommand::Write {
                msg: Box::new(msg),
                ack: Some(ack_tx),
            })
            .map_err(|_| Error::channel_closed())?;
        ack_rx.await.map_err(|_| Error::channel_closed())?
    }

    /// Sends a message without waiting for the outcome.
    pub fn send<M: Send + 'static>(&self, msg: M) -> Result<(), Error> {
        self.cmd_tx
            .send(ChannelCommand::Write {
                msg: Box::new(msg),
                ack: None,
            })
            .map_err(|_| Error::channel_closed())
    }

    /// Requests a graceful close: queued writes are flushed first.
    /// Idempotent; closing an already closed channel is a no-op.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(ChannelCommand::Close);
    }

    /// Resolves once the channel is fully closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        // A dropped sender means the driver is gone, which also counts.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
