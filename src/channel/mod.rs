//! Channels
//!
//! A channel is one TCP connection plus its pipeline, owned by a single
//! event loop. The pieces:
//!
//! - [`ChannelHandle`]: the cloneable, thread-safe face of a channel.
//!   Writes and closes travel to the owning loop as commands.
//! - `ChannelDriver`: the loop-local task that runs the socket.
//! - `WriteQueue`: the outbound byte queue with watermark hysteresis.
//! - [`TransportStats`]: process-wide transport counters.
//!
//! Splitting the handle from the driver keeps all socket and pipeline
//! access on the owning loop thread while handles roam freely.

mod driver;
mod handle;
mod stats;
mod write_queue;

pub use handle::{ChannelHandle, ChannelId, ChannelState};
pub use stats::TransportStats;

pub(crate) use driver::ChannelDriver;
pub(crate) use handle::{ChannelCommand, ChannelCore};
pub(crate) use write_queue::WriteQueue;
