//! Event loop runtime
//!
//! Thread-per-loop execution for channels: each [`EventLoop`] owns its
//! thread, its timers and the channels registered with it. The
//! [`EventLoopGroup`] spreads new channels across loops round-robin.

mod event_loop;
mod timer;

pub use event_loop::{EventLoop, EventLoopGroup};
pub use timer::TimerHandle;

pub(crate) use event_loop::Initializer;
