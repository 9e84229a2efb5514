//! # Wireline - An Async Channel and Pipeline Networking Toolkit
//!
//! Wireline is an event-driven TCP transport core: a small group of
//! single-threaded event loops drives channels whose behavior is composed
//! from pipelines of handlers, with a complete RESP/RESP3 codec and a
//! client-side connection pool on top.
//!
//! ## Features
//!
//! - **Loop affinity**: every channel lives on exactly one loop thread, so
//!   handler code runs single-threaded and lock-free
//! - **Composable pipelines**: inbound and outbound events flow through an
//!   ordered chain of handlers that can transform, drop, or reply
//! - **RESP3 codec**: incremental, zero-copy decode of all fifteen frame
//!   types, with size, depth, and line-length guards
//! - **Backpressure**: per-channel write queues with watermark hysteresis
//! - **Connection pooling**: per-target reuse with FIFO waiters, health
//!   checks, and TTL eviction
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Wireline                                │
//! │                                                                      │
//! │  ┌─────────────┐   accept    ┌──────────────────────────────────┐    │
//! │  │  Server     │────────────>│        EventLoopGroup            │    │
//! │  │  Bootstrap  │ round-robin │  ┌────────┐ ┌────────┐ ┌───────┐ │    │
//! │  └─────────────┘             │  │ loop-0 │ │ loop-1 │ │ ...N  │ │    │
//! │  ┌─────────────┐   connect   │  │ thread │ │ thread │ │       │ │    │
//! │  │ Connector / │────────────>│  └───┬────┘ └────────┘ └───────┘ │    │
//! │  │ Connection  │             └──────┼───────────────────────────┘    │
//! │  │    Pool     │                    │ owns                           │
//! │  └─────────────┘                    ▼                                │
//! │                  ┌──────────────────────────────────────┐            │
//! │                  │   Channel (socket + write queue)     │            │
//! │                  │  ┌────────────────────────────────┐  │            │
//! │                  │  │ Pipeline:                      │  │            │
//! │                  │  │  RespDecoder → app handlers    │  │            │
//! │                  │  │  RespEncoder ← app handlers    │  │            │
//! │                  │  └────────────────────────────────┘  │            │
//! │                  └──────────────────────────────────────┘            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use wireline::bootstrap::ServerBootstrap;
//! use wireline::codec::{RespDecoder, RespEncoder, RespValue};
//! use wireline::config::Config;
//! use wireline::pipeline::{Caps, Context, Handler, Message};
//! use wireline::runtime::EventLoopGroup;
//!
//! struct Ping;
//!
//! impl Handler for Ping {
//!     fn capabilities(&self) -> Caps {
//!         Caps::INBOUND
//!     }
//!
//!     fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
//!         if msg.downcast::<RespValue>().is_ok() {
//!             ctx.write(Box::new(RespValue::pong()));
//!         }
//!     }
//! }
//!
//! fn main() -> Result<(), wireline::Error> {
//!     let config = Config::from_env();
//!     let group = EventLoopGroup::new(config.clone())?;
//!
//!     let server = ServerBootstrap::new(&group)
//!         .initializer(move |pipeline| {
//!             pipeline.add_last("decoder", RespDecoder::new(&config)).unwrap();
//!             pipeline.add_last("encoder", RespEncoder::new()).unwrap();
//!             pipeline.add_last("ping", Ping).unwrap();
//!         })
//!         .bind("127.0.0.1:6379")?;
//!
//!     println!("listening on {}", server.local_addr());
//!     loop {
//!         std::thread::park();
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`runtime`]: event loop threads, timers, the loop group
//! - [`channel`]: channel handles, state, transport counters
//! - [`pipeline`]: the handler chain and dispatch machinery
//! - [`codec`]: RESP/RESP3 values, parser, encoder, pipeline adapters
//! - [`buffer`]: the byte buffer channels read into and codecs consume
//! - [`bootstrap`]: server acceptor and client connector
//! - [`pool`]: per-target connection pooling
//! - [`config`]: tunables shared by all of the above
//! - [`error`]: the error taxonomy
//!
//! ## Design Highlights
//!
//! ### One Thread per Channel
//!
//! A channel is registered with exactly one event loop and never migrates.
//! All of its I/O, pipeline dispatch, and timer callbacks run on that
//! thread, so handlers keep plain `&mut self` state without locks. Other
//! threads interact through cloneable [`channel::ChannelHandle`]s that
//! submit commands to the owning loop.
//!
//! ### Queued Pipeline Dispatch
//!
//! Events fired from inside a handler are queued and dispatched after the
//! current handler returns, never recursively. Any single event observes a
//! stable handler order; mutations requested mid-dispatch apply between
//! events.
//!
//! ### Zero-Copy Decoding
//!
//! The RESP parser works directly on the channel's read buffer using
//! `bytes::Bytes`. Bulk payloads are sliced, not copied, and a frame
//! split across any number of TCP segments decodes exactly as if it had
//! arrived whole.
//!
//! ### Bounded Everything
//!
//! Decoded frames are capped by `max_frame_size` (checked before any
//! allocation, using declared lengths), nesting depth and unterminated
//! line length have hard limits, and outbound queues report backpressure
//! through watermark crossings.

pub mod bootstrap;
pub mod buffer;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod runtime;

// Re-export commonly used types for convenience
pub use bootstrap::{Connector, Server, ServerBootstrap};
pub use buffer::ByteBuf;
pub use channel::{ChannelHandle, ChannelId, ChannelState, TransportStats};
pub use codec::{ProtocolError, RespDecoder, RespEncoder, RespParser, RespValue};
pub use config::Config;
pub use error::{Error, TimeoutKind};
pub use pipeline::{Caps, Context, Handler, Message, Pipeline};
pub use pool::{ConnectionPool, PooledChannel};
pub use runtime::{EventLoop, EventLoopGroup};

/// Version of Wireline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
