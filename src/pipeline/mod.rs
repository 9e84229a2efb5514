//! Channel Pipeline
//!
//! Every channel owns an ordered chain of [`Handler`]s that all inbound
//! events and outbound operations flow through:
//!
//! ```text
//!                 ┌──────────┐   ┌──────────┐   ┌──────────┐
//!   socket ──────►│ handler 0│──►│ handler 1│──►│ handler 2│──► tail
//!   (head)        │          │   │          │   │          │    (drop /
//!      ▲          └──────────┘   └──────────┘   └──────────┘    close on
//!      │                inbound: index 0 → N                    error)
//!      │
//!      └──────────  outbound: index N → 0  ◄──────── writes, close
//! ```
//!
//! Inbound events enter at the head and visit handlers with the
//! [`Caps::INBOUND`] capability in index order. Outbound operations
//! start at the tail (or below the handler that issued them) and visit
//! [`Caps::OUTBOUND`] handlers in reverse order until they reach the
//! head, where wire-ready bytes are queued for the transport.
//!
//! Dispatch is queued, not recursive: a handler reacting to an event
//! enqueues follow-up events which run after it returns. Event order is
//! therefore FIFO per channel no matter how handlers fan out, and a
//! handler is never re-entered.
//!
//! Pipelines are single-threaded. They live on their channel's event
//! loop and are driven only from there; other threads reach them through
//! [`ChannelHandle`](crate::channel::ChannelHandle) commands.

mod handler;
mod logging;

pub use handler::{Caps, Handler, Message};
pub use logging::LoggingHandler;

use crate::buffer::ByteBuf;
use crate::channel::ChannelId;
use crate::channel::ChannelCore;
use crate::codec::EncodeError;
use crate::error::Error;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Errors from pipeline mutation.
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Handler names are unique within a pipeline
    #[error("duplicate handler name: {0}")]
    DuplicateName(String),

    /// No handler registered under this name
    #[error("no such handler: {0}")]
    NotFound(String),
}

/// Write acknowledgment: resolved once the message reached the transport
/// queue, or failed in an outbound handler.
pub(crate) type WriteAck = oneshot::Sender<Result<(), Error>>;

/// Operations the pipeline hands to the transport after a dispatch.
pub(crate) enum SinkOp {
    /// Wire-ready bytes for the outbound queue
    Write(Bytes),
    /// Graceful close requested
    Close,
}

enum InboundKind {
    Active,
    Read(Message),
    ReadComplete,
    WritabilityChanged(bool),
    Error(Error),
    Inactive,
}

enum OutboundKind {
    Write { msg: Message, ack: Option<WriteAck> },
    Close,
}

enum Event {
    /// Scans for an inbound handler at `from` or later.
    Inbound { from: usize, kind: InboundKind },
    /// Scans for an outbound handler strictly below `below`.
    Outbound { below: usize, kind: OutboundKind },
}

struct Entry {
    name: String,
    caps: Caps,
    /// Taken while the handler is on the call stack.
    handler: Option<Box<dyn Handler>>,
}

/// The ordered handler chain of one channel.
pub struct Pipeline {
    core: Arc<ChannelCore>,
    entries: Vec<Entry>,
    queue: VecDeque<Event>,
    sink: VecDeque<SinkOp>,
    dispatching: bool,
    pending_removals: Vec<String>,
}

impl Pipeline {
    pub(crate) fn new(core: Arc<ChannelCore>) -> Self {
        Self {
            core,
            entries: Vec::new(),
            queue: VecDeque::new(),
            sink: VecDeque::new(),
            dispatching: false,
            pending_removals: Vec::new(),
        }
    }

    /// Appends a handler at the tail.
    pub fn add_last<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), PipelineError>
    where
        H: Handler + 'static,
    {
        self.insert_at(self.entries.len(), name.into(), Box::new(handler))
    }

    /// Inserts a handler at the head.
    pub fn add_first<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), PipelineError>
    where
        H: Handler + 'static,
    {
        self.insert_at(0, name.into(), Box::new(handler))
    }

    /// Inserts a handler just before `anchor`.
    pub fn add_before<H>(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), PipelineError>
    where
        H: Handler + 'static,
    {
        let pos = self.position(anchor)?;
        self.insert_at(pos, name.into(), Box::new(handler))
    }

    /// Inserts a handler just after `anchor`.
    pub fn add_after<H>(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), PipelineError>
    where
        H: Handler + 'static,
    {
        let pos = self.position(anchor)?;
        self.insert_at(pos + 1, name.into(), Box::new(handler))
    }

    /// Removes a handler by name and returns it.
    pub fn remove(&mut self, name: &str) -> Result<Box<dyn Handler>, PipelineError> {
        let pos = self.position(name)?;
        let entry = self.entries.remove(pos);
        entry
            .handler
            .ok_or_else(|| PipelineError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handler names in pipeline order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn position(&self, name: &str) -> Result<usize, PipelineError> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PipelineError::NotFound(name.to_string()))
    }

    fn insert_at(
        &mut self,
        index: usize,
        name: String,
        handler: Box<dyn Handler>,
    ) -> Result<(), PipelineError> {
        if self.contains(&name) {
            return Err(PipelineError::DuplicateName(name));
        }
        let caps = handler.capabilities();
        self.entries.insert(
            index,
            Entry {
                name,
                caps,
                handler: Some(handler),
            },
        );
        Ok(())
    }

    // ---- transport-facing entry points -------------------------------

    pub(crate) fn fire_active(&mut self) {
        self.enqueue_inbound(0, InboundKind::Active);
    }

    pub(crate) fn fire_read(&mut self, msg: Message) {
        self.enqueue_inbound(0, InboundKind::Read(msg));
    }

    pub(crate) fn fire_read_complete(&mut self) {
        self.enqueue_inbound(0, InboundKind::ReadComplete);
    }

    pub(crate) fn fire_writability_changed(&mut self, writable: bool) {
        self.enqueue_inbound(0, InboundKind::WritabilityChanged(writable));
    }

    pub(crate) fn fire_error(&mut self, error: Error) {
        self.enqueue_inbound(0, InboundKind::Error(error));
    }

    pub(crate) fn fire_inactive(&mut self) {
        self.enqueue_inbound(0, InboundKind::Inactive);
    }

    /// Submits an outbound write entering at the tail.
    pub(crate) fn submit_write(&mut self, msg: Message, ack: Option<WriteAck>) {
        let below = self.entries.len();
        self.queue
            .push_back(Event::Outbound {
                below,
                kind: OutboundKind::Write { msg, ack },
            });
        self.pump();
    }

    /// Submits a close request entering at the tail.
    pub(crate) fn submit_close(&mut self) {
        let below = self.entries.len();
        self.queue.push_back(Event::Outbound {
            below,
            kind: OutboundKind::Close,
        });
        self.pump();
    }

    /// Next transport operation produced by dispatched events, if any.
    pub(crate) fn poll_sink(&mut self) -> Option<SinkOp> {
        self.sink.pop_front()
    }

    fn enqueue_inbound(&mut self, from: usize, kind: InboundKind) {
        self.queue.push_back(Event::Inbound { from, kind });
        self.pump();
    }

    // ---- dispatch ----------------------------------------------------

    /// Drains the event queue. Events enqueued while a dispatch is
    /// already running are drained by that dispatch.
    fn pump(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(event) = self.queue.pop_front() {
            match event {
                Event::Inbound { from, kind } => self.dispatch_inbound(from, kind),
                Event::Outbound { below, kind } => self.dispatch_outbound(below, kind),
            }
        }
        self.dispatching = false;
        self.apply_removals();
    }

    fn dispatch_inbound(&mut self, from: usize, kind: InboundKind) {
        let mut target = None;
        for i in from..self.entries.len() {
            if self.entries[i].caps.handles_inbound() && self.entries[i].handler.is_some() {
                target = Some(i);
                break;
            }
        }
        let idx = match target {
            Some(idx) => idx,
            None => return self.tail_inbound(kind),
        };

        let mut handler = match self.entries[idx].handler.take() {
            Some(handler) => handler,
            None => return,
        };
        let mut ctx = Context {
            core: &self.core,
            name: &self.entries[idx].name,
            index: idx,
            queue: &mut self.queue,
            sink: &mut self.sink,
            removals: &mut self.pending_removals,
            ack: None,
        };

        match kind {
            InboundKind::Active => handler.on_active(&mut ctx),
            InboundKind::Read(msg) => handler.on_read(&mut ctx, msg),
            InboundKind::ReadComplete => handler.on_read_complete(&mut ctx),
            InboundKind::WritabilityChanged(w) => handler.on_writability_changed(&mut ctx, w),
            InboundKind::Error(e) => handler.on_error(&mut ctx, e),
            InboundKind::Inactive => handler.on_inactive(&mut ctx),
        }

        self.entries[idx].handler = Some(handler);
    }

    fn dispatch_outbound(&mut self, below: usize, kind: OutboundKind) {
        let limit = below.min(self.entries.len());
        let mut target = None;
        for i in (0..limit).rev() {
            if self.entries[i].caps.handles_outbound() && self.entries[i].handler.is_some() {
                target = Some(i);
                break;
            }
        }
        let idx = match target {
            Some(idx) => idx,
            None => return self.sink_outbound(kind),
        };

        let mut handler = match self.entries[idx].handler.take() {
            Some(handler) => handler,
            None => return,
        };

        match kind {
            OutboundKind::Write { msg, ack } => {
                let mut ctx = Context {
                    core: &self.core,
                    name: &self.entries[idx].name,
                    index: idx,
                    queue: &mut self.queue,
                    sink: &mut self.sink,
                    removals: &mut self.pending_removals,
                    ack,
                };
                let result = handler.on_write(&mut ctx, msg);
                let leftover = ctx.ack.take();
                match result {
                    Ok(()) => {
                        // A message consumed without forwarding still
                        // counts as delivered to this stage.
                        if let Some(ack) = leftover {
                            let _ = ack.send(Ok(()));
                        }
                    }
                    Err(e) => match leftover {
                        Some(ack) => {
                            let _ = ack.send(Err(e));
                        }
                        None => {
                            warn!(
                                channel = %self.core.id,
                                error = %e,
                                "outbound handler failed after forwarding the write"
                            );
                        }
                    },
                }
            }
            OutboundKind::Close => {
                let mut ctx = Context {
                    core: &self.core,
                    name: &self.entries[idx].name,
                    index: idx,
                    queue: &mut self.queue,
                    sink: &mut self.sink,
                    removals: &mut self.pending_removals,
                    ack: None,
                };
                handler.on_close(&mut ctx);
            }
        }

        self.entries[idx].handler = Some(handler);
    }

    /// Inbound events that fell off the tail.
    fn tail_inbound(&mut self, kind: InboundKind) {
        match kind {
            InboundKind::Read(_) => {
                debug!(
                    channel = %self.core.id,
                    "inbound message reached the pipeline tail unhandled"
                );
            }
            InboundKind::Error(e) => {
                warn!(
                    channel = %self.core.id,
                    error = %e,
                    "unhandled pipeline error; closing channel"
                );
                self.sink.push_back(SinkOp::Close);
            }
            _ => {}
        }
    }

    /// Outbound operations that reached the head.
    fn sink_outbound(&mut self, kind: OutboundKind) {
        match kind {
            OutboundKind::Write { msg, ack } => match downcast_wire(msg) {
                Some(bytes) => {
                    self.sink.push_back(SinkOp::Write(bytes));
                    if let Some(ack) = ack {
                        let _ = ack.send(Ok(()));
                    }
                }
                None => {
                    warn!(
                        channel = %self.core.id,
                        "outbound message reached the head without a wire encoding"
                    );
                    if let Some(ack) = ack {
                        let _ = ack.send(Err(Error::Encode(EncodeError::UnsupportedMessage)));
                    }
                }
            },
            OutboundKind::Close => self.sink.push_back(SinkOp::Close),
        }
    }

    fn apply_removals(&mut self) {
        if self.pending_removals.is_empty() {
            return;
        }
        let names = std::mem::take(&mut self.pending_removals);
        for name in names {
            if let Some(pos) = self.entries.iter().position(|e| e.name == name) {
                let entry = self.entries.remove(pos);
                debug!(
                    channel = %self.core.id,
                    handler = %entry.name,
                    "handler removed itself from the pipeline"
                );
            }
        }
    }
}

/// The head accepts anything already in wire form.
fn downcast_wire(msg: Message) -> Option<Bytes> {
    let msg = match msg.downcast::<Bytes>() {
        Ok(bytes) => return Some(*bytes),
        Err(msg) => msg,
    };
    let msg = match msg.downcast::<ByteBuf>() {
        Ok(mut buf) => return Some(buf.take()),
        Err(msg) => msg,
    };
    match msg.downcast::<Vec<u8>>() {
        Ok(vec) => Some(Bytes::from(*vec)),
        Err(_) => None,
    }
}

/// A handler's view of its pipeline during one event.
///
/// All `fire_*` and write methods enqueue follow-up events; nothing runs
/// until the current handler returns.
pub struct Context<'a> {
    core: &'a ChannelCore,
    name: &'a str,
    index: usize,
    queue: &'a mut VecDeque<Event>,
    sink: &'a mut VecDeque<SinkOp>,
    removals: &'a mut Vec<String>,
    /// Acknowledgment of the write currently being dispatched, if any.
    ack: Option<WriteAck>,
}

impl Context<'_> {
    pub fn channel_id(&self) -> ChannelId {
        self.core.id
    }

    /// Name this handler was registered under.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.core.peer
    }

    pub fn is_writable(&self) -> bool {
        self.core.is_writable()
    }

    /// Forwards channel-active to the next inbound handler.
    pub fn fire_active(&mut self) {
        self.queue.push_back(Event::Inbound {
            from: self.index + 1,
            kind: InboundKind::Active,
        });
    }

    /// Forwards a message to the next inbound handler.
    pub fn fire_read(&mut self, msg: Message) {
        self.queue.push_back(Event::Inbound {
            from: self.index + 1,
            kind: InboundKind::Read(msg),
        });
    }

    /// Forwards end-of-read-burst to the next inbound handler.
    pub fn fire_read_complete(&mut self) {
        self.queue.push_back(Event::Inbound {
            from: self.index + 1,
            kind: InboundKind::ReadComplete,
        });
    }

    /// Forwards a writability change to the next inbound handler.
    pub fn fire_writability_changed(&mut self, writable: bool) {
        self.queue.push_back(Event::Inbound {
            from: self.index + 1,
            kind: InboundKind::WritabilityChanged(writable),
        });
    }

    /// Forwards an error to the next inbound handler.
    pub fn fire_error(&mut self, error: Error) {
        self.queue.push_back(Event::Inbound {
            from: self.index + 1,
            kind: InboundKind::Error(error),
        });
    }

    /// Forwards channel-inactive to the next inbound handler.
    pub fn fire_inactive(&mut self) {
        self.queue.push_back(Event::Inbound {
            from: self.index + 1,
            kind: InboundKind::Inactive,
        });
    }

    /// Starts a new outbound write below the current handler.
    pub fn write(&mut self, msg: Message) {
        self.queue.push_back(Event::Outbound {
            below: self.index,
            kind: OutboundKind::Write { msg, ack: None },
        });
    }

    /// Forwards the write being dispatched, keeping its acknowledgment
    /// attached. Outside `on_write` this behaves like [`Context::write`].
    pub fn forward_write(&mut self, msg: Message) {
        let ack = self.ack.take();
        self.queue.push_back(Event::Outbound {
            below: self.index,
            kind: OutboundKind::Write { msg, ack },
        });
    }

    /// Requests a close, continuing below the current handler.
    pub fn close(&mut self) {
        self.queue.push_back(Event::Outbound {
            below: self.index,
            kind: OutboundKind::Close,
        });
    }

    /// Removes this handler once the current dispatch finishes.
    ///
    /// Deferred because indices shift on removal; the queued events of
    /// the running dispatch still rely on them.
    pub fn remove_self(&mut self) {
        self.removals.push(self.name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn test_pipeline() -> Pipeline {
        let core = Arc::new(ChannelCore::new("127.0.0.1:0".parse().unwrap()));
        Pipeline::new(core)
    }

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every event it sees, then forwards it.
    struct Recorder {
        tag: &'static str,
        caps: Caps,
        log: Log,
    }

    impl Recorder {
        fn new(tag: &'static str, caps: Caps, log: &Log) -> Self {
            Self {
                tag,
                caps,
                log: log.clone(),
            }
        }

        fn note(&self, event: &str) {
            self.log.borrow_mut().push(format!("{}:{}", self.tag, event));
        }
    }

    impl Handler for Recorder {
        fn capabilities(&self) -> Caps {
            self.caps
        }

        fn on_active(&mut self, ctx: &mut Context<'_>) {
            self.note("active");
            ctx.fire_active();
        }

        fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
            self.note("read");
            ctx.fire_read(msg);
        }

        fn on_error(&mut self, ctx: &mut Context<'_>, error: Error) {
            self.note("error");
            ctx.fire_error(error);
        }

        fn on_write(&mut self, ctx: &mut Context<'_>, msg: Message) -> Result<(), Error> {
            self.note("write");
            ctx.forward_write(msg);
            Ok(())
        }

        fn on_close(&mut self, ctx: &mut Context<'_>) {
            self.note("close");
            ctx.close();
        }
    }

    fn drain_sink(pipeline: &mut Pipeline) -> Vec<SinkOp> {
        let mut ops = Vec::new();
        while let Some(op) = pipeline.poll_sink() {
            ops.push(op);
        }
        ops
    }

    #[test]
    fn test_inbound_order_skips_outbound_only_handlers() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = test_pipeline();
        pipeline
            .add_last("a", Recorder::new("a", Caps::INBOUND, &log))
            .unwrap();
        pipeline
            .add_last("b", Recorder::new("b", Caps::OUTBOUND, &log))
            .unwrap();
        pipeline
            .add_last("c", Recorder::new("c", Caps::DUPLEX, &log))
            .unwrap();

        pipeline.fire_read(Box::new(Bytes::from_static(b"x")));
        assert_eq!(*log.borrow(), vec!["a:read", "c:read"]);
    }

    #[test]
    fn test_outbound_order_is_reversed_and_skips_inbound_only() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = test_pipeline();
        pipeline
            .add_last("a", Recorder::new("a", Caps::OUTBOUND, &log))
            .unwrap();
        pipeline
            .add_last("b", Recorder::new("b", Caps::INBOUND, &log))
            .unwrap();
        pipeline
            .add_last("c", Recorder::new("c", Caps::DUPLEX, &log))
            .unwrap();

        pipeline.submit_write(Box::new(Bytes::from_static(b"x")), None);
        assert_eq!(*log.borrow(), vec!["c:write", "a:write"]);
    }

    #[test]
    fn test_write_reaching_head_is_queued_and_acked() {
        let mut pipeline = test_pipeline();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        pipeline.submit_write(Box::new(Bytes::from_static(b"hello")), Some(ack_tx));

        let ops = drain_sink(&mut pipeline);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            SinkOp::Write(bytes) => assert_eq!(&bytes[..], b"hello"),
            SinkOp::Close => panic!("expected a write"),
        }
        assert!(matches!(ack_rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_unencodable_write_fails_ack_without_closing() {
        struct Opaque;

        let mut pipeline = test_pipeline();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        pipeline.submit_write(Box::new(Opaque), Some(ack_tx));

        assert!(drain_sink(&mut pipeline).is_empty());
        match ack_rx.try_recv() {
            Ok(Err(Error::Encode(EncodeError::UnsupportedMessage))) => {}
            other => panic!("expected an encode failure, got {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn test_handler_transforms_write_and_ack_travels() {
        /// Encodes &str messages to bytes.
        struct StrEncoder;
        impl Handler for StrEncoder {
            fn capabilities(&self) -> Caps {
                Caps::OUTBOUND
            }
            fn on_write(&mut self, ctx: &mut Context<'_>, msg: Message) -> Result<(), Error> {
                match msg.downcast::<&'static str>() {
                    Ok(s) => ctx.forward_write(Box::new(Bytes::from(*s))),
                    Err(other) => ctx.forward_write(other),
                }
                Ok(())
            }
        }

        let mut pipeline = test_pipeline();
        pipeline.add_last("enc", StrEncoder).unwrap();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        pipeline.submit_write(Box::new("ping"), Some(ack_tx));

        match drain_sink(&mut pipeline).as_slice() {
            [SinkOp::Write(bytes)] => assert_eq!(&bytes[..], b"ping"),
            _ => panic!("expected exactly one write"),
        }
        assert!(matches!(ack_rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_consuming_write_acks_ok() {
        /// Swallows every write.
        struct Sink;
        impl Handler for Sink {
            fn capabilities(&self) -> Caps {
                Caps::OUTBOUND
            }
            fn on_write(&mut self, _ctx: &mut Context<'_>, _msg: Message) -> Result<(), Error> {
                Ok(())
            }
        }

        let mut pipeline = test_pipeline();
        pipeline.add_last("sink", Sink).unwrap();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        pipeline.submit_write(Box::new(Bytes::from_static(b"x")), Some(ack_tx));

        assert!(drain_sink(&mut pipeline).is_empty());
        assert!(matches!(ack_rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_failed_write_does_not_close_channel() {
        struct Rejecting;
        impl Handler for Rejecting {
            fn capabilities(&self) -> Caps {
                Caps::OUTBOUND
            }
            fn on_write(&mut self, _ctx: &mut Context<'_>, _msg: Message) -> Result<(), Error> {
                Err(Error::Encode(EncodeError::UnsupportedMessage))
            }
        }

        let mut pipeline = test_pipeline();
        pipeline.add_last("rejecting", Rejecting).unwrap();
        let (ack_tx, mut ack_rx) = oneshot::channel();

        pipeline.submit_write(Box::new(Bytes::from_static(b"x")), Some(ack_tx));

        assert!(matches!(ack_rx.try_recv(), Ok(Err(Error::Encode(_)))));
        // The failure stays scoped to the write.
        assert!(drain_sink(&mut pipeline).is_empty());
    }

    #[test]
    fn test_ctx_write_enters_below_current_handler() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        /// Replies to reads by writing from the middle of the pipeline.
        struct Replier;
        impl Handler for Replier {
            fn capabilities(&self) -> Caps {
                Caps::INBOUND
            }
            fn on_read(&mut self, ctx: &mut Context<'_>, _msg: Message) {
                ctx.write(Box::new(Bytes::from_static(b"reply")));
            }
        }

        let mut pipeline = test_pipeline();
        pipeline
            .add_last("below", Recorder::new("below", Caps::OUTBOUND, &log))
            .unwrap();
        pipeline.add_last("replier", Replier).unwrap();
        pipeline
            .add_last("above", Recorder::new("above", Caps::OUTBOUND, &log))
            .unwrap();

        pipeline.fire_read(Box::new(Bytes::from_static(b"ping")));

        // Only the handler below the replier sees the write.
        assert_eq!(*log.borrow(), vec!["below:write"]);
        match drain_sink(&mut pipeline).as_slice() {
            [SinkOp::Write(bytes)] => assert_eq!(&bytes[..], b"reply"),
            _ => panic!("expected exactly one write"),
        }
    }

    #[test]
    fn test_unhandled_error_closes_channel() {
        let mut pipeline = test_pipeline();
        pipeline.fire_error(Error::channel_closed());
        assert!(matches!(
            drain_sink(&mut pipeline).as_slice(),
            [SinkOp::Close]
        ));
    }

    #[test]
    fn test_handled_error_stops_at_handler() {
        /// Swallows errors instead of forwarding them.
        struct Suppressor;
        impl Handler for Suppressor {
            fn capabilities(&self) -> Caps {
                Caps::INBOUND
            }
            fn on_error(&mut self, _ctx: &mut Context<'_>, _error: Error) {}
        }

        let mut pipeline = test_pipeline();
        pipeline.add_last("suppressor", Suppressor).unwrap();
        pipeline.fire_error(Error::channel_closed());
        assert!(drain_sink(&mut pipeline).is_empty());
    }

    #[test]
    fn test_unhandled_read_is_dropped() {
        let mut pipeline = test_pipeline();
        pipeline.fire_read(Box::new(Bytes::from_static(b"nobody home")));
        assert!(drain_sink(&mut pipeline).is_empty());
    }

    #[test]
    fn test_close_travels_through_outbound_handlers() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = test_pipeline();
        pipeline
            .add_last("a", Recorder::new("a", Caps::DUPLEX, &log))
            .unwrap();

        pipeline.submit_close();

        assert_eq!(*log.borrow(), vec!["a:close"]);
        assert!(matches!(
            drain_sink(&mut pipeline).as_slice(),
            [SinkOp::Close]
        ));
    }

    #[test]
    fn test_dispatch_is_queued_not_recursive() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        /// Fans one read out into two, logging around the fan-out.
        struct FanOut {
            log: Log,
        }
        impl Handler for FanOut {
            fn capabilities(&self) -> Caps {
                Caps::INBOUND
            }
            fn on_read(&mut self, ctx: &mut Context<'_>, _msg: Message) {
                self.log.borrow_mut().push("fan:before".to_string());
                ctx.fire_read(Box::new(1u32));
                ctx.fire_read(Box::new(2u32));
                self.log.borrow_mut().push("fan:after".to_string());
            }
        }

        struct Collect {
            log: Log,
        }
        impl Handler for Collect {
            fn capabilities(&self) -> Caps {
                Caps::INBOUND
            }
            fn on_read(&mut self, _ctx: &mut Context<'_>, msg: Message) {
                let n = msg.downcast::<u32>().map(|n| *n).unwrap_or_default();
                self.log.borrow_mut().push(format!("collect:{}", n));
            }
        }

        let mut pipeline = test_pipeline();
        pipeline
            .add_last("fan", FanOut { log: log.clone() })
            .unwrap();
        pipeline
            .add_last("collect", Collect { log: log.clone() })
            .unwrap();

        pipeline.fire_read(Box::new(Bytes::new()));

        // Both fan-out messages run after the handler returned, in FIFO
        // order.
        assert_eq!(
            *log.borrow(),
            vec!["fan:before", "fan:after", "collect:1", "collect:2"]
        );
    }

    #[test]
    fn test_add_ordering_operations() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = test_pipeline();
        pipeline
            .add_last("b", Recorder::new("b", Caps::DUPLEX, &log))
            .unwrap();
        pipeline
            .add_first("a", Recorder::new("a", Caps::DUPLEX, &log))
            .unwrap();
        pipeline
            .add_after("b", "d", Recorder::new("d", Caps::DUPLEX, &log))
            .unwrap();
        pipeline
            .add_before("d", "c", Recorder::new("c", Caps::DUPLEX, &log))
            .unwrap();

        assert_eq!(pipeline.names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_duplicate_and_missing_names() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = test_pipeline();
        pipeline
            .add_last("a", Recorder::new("a", Caps::DUPLEX, &log))
            .unwrap();

        assert_eq!(
            pipeline.add_last("a", Recorder::new("a", Caps::DUPLEX, &log)),
            Err(PipelineError::DuplicateName("a".to_string()))
        );
        assert!(matches!(
            pipeline.remove("zzz"),
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            pipeline.add_before("zzz", "b", Recorder::new("b", Caps::DUPLEX, &log)),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_returns_handler() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = test_pipeline();
        pipeline
            .add_last("a", Recorder::new("a", Caps::DUPLEX, &log))
            .unwrap();

        let removed = pipeline.remove("a").unwrap();
        assert!(removed.capabilities().handles_inbound());
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_remove_self_applies_after_dispatch() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));

        /// Handles exactly one read, then drops out of the chain.
        struct OneShot {
            log: Log,
        }
        impl Handler for OneShot {
            fn capabilities(&self) -> Caps {
                Caps::INBOUND
            }
            fn on_read(&mut self, ctx: &mut Context<'_>, msg: Message) {
                self.log.borrow_mut().push("oneshot:read".to_string());
                ctx.remove_self();
                ctx.fire_read(msg);
            }
        }

        let mut pipeline = test_pipeline();
        pipeline
            .add_last("oneshot", OneShot { log: log.clone() })
            .unwrap();
        pipeline
            .add_last("rest", Recorder::new("rest", Caps::INBOUND, &log))
            .unwrap();

        pipeline.fire_read(Box::new(Bytes::from_static(b"first")));
        assert!(!pipeline.contains("oneshot"));

        pipeline.fire_read(Box::new(Bytes::from_static(b"second")));
        assert_eq!(
            *log.borrow(),
            vec!["oneshot:read", "rest:read", "rest:read"]
        );
    }
}
