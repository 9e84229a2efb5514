//! Event Loops
//!
//! An [`EventLoop`] is a dedicated OS thread running a single-threaded
//! tokio runtime. Channels are registered with exactly one loop and all
//! of their I/O, pipeline dispatch and timer callbacks run on that
//! thread for the channel's whole life, so handlers never need locks.
//!
//! ```text
//!   EventLoopGroup
//!   ├── wireline-loop-0  ──  channels 1, 4, 7, ...   (thread + runtime)
//!   ├── wireline-loop-1  ──  channels 2, 5, 8, ...
//!   └── wireline-loop-2  ──  channels 3, 6, 9, ...
//! ```
//!
//! Other threads talk to a loop through its command queue: closures to
//! run, timers to schedule, sockets to register. Sockets cross threads
//! in their blocking `std` form and are handed to the loop's reactor on
//! arrival, which is what pins their I/O to that thread.

use crate::channel::{ChannelDriver, ChannelHandle, ChannelId, ChannelState};
use crate::channel::{ChannelCore, TransportStats};
use crate::config::Config;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::runtime::timer::{TimerHandle, TimerQueue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Sets up a freshly registered channel's pipeline. Runs on the owning
/// event loop thread.
pub type Initializer = Box<dyn FnOnce(&mut Pipeline) + Send>;

type RegisterReply = oneshot::Sender<Result<ChannelHandle, Error>>;
type Registry = Rc<RefCell<HashMap<ChannelId, ChannelHandle>>>;

enum LoopCommand {
    /// Run a closure on the loop thread.
    Execute(Box<dyn FnOnce() + Send>),
    /// Run a closure at a deadline.
    Schedule {
        deadline: Instant,
        cancelled: Arc<AtomicBool>,
        task: Box<dyn FnOnce() + Send>,
    },
    /// Adopt a socket: build its pipeline and start its driver here.
    Register {
        stream: std::net::TcpStream,
        init: Initializer,
        reply: Option<RegisterReply>,
    },
    /// Stop accepting commands and wind down.
    Shutdown,
}

/// A handle to one event loop. Cheap to clone; all clones submit to the
/// same thread.
#[derive(Debug, Clone)]
pub struct EventLoop {
    inner: Arc<LoopShared>,
}

#[derive(Debug)]
struct LoopShared {
    index: usize,
    tx: mpsc::UnboundedSender<LoopCommand>,
}

impl EventLoop {
    /// Position of this loop within its group.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Runs a closure on the loop thread, after already queued work.
    pub fn execute<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(LoopCommand::Execute(Box::new(f)))
    }

    /// Runs a closure on the loop thread after `delay`.
    ///
    /// Timers on one loop fire in deadline order; equal deadlines fire
    /// in submission order.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> Result<TimerHandle, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, f)
    }

    /// Runs a closure on the loop thread at `deadline`. A deadline in the
    /// past fires on the next loop iteration.
    pub fn schedule_at<F>(&self, deadline: Instant, f: F) -> Result<TimerHandle, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.send(LoopCommand::Schedule {
            deadline,
            cancelled: cancelled.clone(),
            task: Box::new(f),
        })?;
        Ok(TimerHandle::new(cancelled))
    }

    /// Registers a connected socket with this loop and returns its
    /// handle once the pipeline is initialized and the driver running.
    pub(crate) async fn register(
        &self,
        stream: std::net::TcpStream,
        init: Initializer,
    ) -> Result<ChannelHandle, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(LoopCommand::Register {
            stream,
            init,
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| Error::loop_closed())?
    }

    /// Registers a socket without waiting for the outcome.
    pub(crate) fn register_detached(
        &self,
        stream: std::net::TcpStream,
        init: Initializer,
    ) -> Result<(), Error> {
        self.send(LoopCommand::Register {
            stream,
            init,
            reply: None,
        })
    }

    fn send(&self, cmd: LoopCommand) -> Result<(), Error> {
        self.inner.tx.send(cmd).map_err(|_| Error::loop_closed())
    }
}

/// A fixed set of event loops sharing incoming channels round-robin.
///
/// # Example
///
/// ```ignore
/// use wireline::config::Config;
/// use wireline::runtime::EventLoopGroup;
///
/// let group = EventLoopGroup::new(Config::default())?;
/// group.next().execute(|| println!("on the loop thread"))?;
/// group.shutdown();
/// ```
#[derive(Debug)]
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    threads: Vec<std::thread::JoinHandle<()>>,
    next: AtomicUsize,
    config: Arc<Config>,
    stats: Arc<TransportStats>,
}

impl EventLoopGroup {
    /// Spawns `config.event_loop_threads` loop threads.
    pub fn new(config: Config) -> Result<Self, Error> {
        let config = Arc::new(config);
        let stats = Arc::new(TransportStats::new());
        let count = config.event_loop_threads.max(1);

        let mut loops = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let thread = {
                let config = config.clone();
                let stats = stats.clone();
                std::thread::Builder::new()
                    .name(format!("wireline-loop-{}", index))
                    .spawn(move || run_loop(index, rx, config, stats))?
            };
            loops.push(EventLoop {
                inner: Arc::new(LoopShared { index, tx }),
            });
            threads.push(thread);
        }

        info!(threads = count, "event loop group started");
        Ok(Self {
            loops,
            threads,
            next: AtomicUsize::new(0),
            config,
            stats,
        })
    }

    /// Picks the next loop round-robin.
    pub fn next(&self) -> &EventLoop {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[idx]
    }

    /// All loops in this group.
    pub fn loops(&self) -> &[EventLoop] {
        &self.loops
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Counters aggregated across every channel of this group.
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub(crate) fn config_handle(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub(crate) fn stats_handle(&self) -> Arc<TransportStats> {
        self.stats.clone()
    }

    /// Stops every loop: open channels are closed gracefully, queued
    /// commands run, then the threads exit. Blocks until they have.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        info!(threads = self.threads.len(), "shutting down event loop group");
        for event_loop in &self.loops {
            let _ = event_loop.send(LoopCommand::Shutdown);
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Thread main: a current-thread runtime plus a `LocalSet`, so channel
/// drivers can be `!Send` tasks.
fn run_loop(
    index: usize,
    rx: mpsc::UnboundedReceiver<LoopCommand>,
    config: Arc<Config>,
    stats: Arc<TransportStats>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(loop_index = index, error = %e, "failed to build loop runtime");
            return;
        }
    };
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, main_loop(index, rx, config, stats));
    debug!(loop_index = index, "event loop stopped");
}

async fn main_loop(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<LoopCommand>,
    config: Arc<Config>,
    stats: Arc<TransportStats>,
) {
    let mut timers = TimerQueue::new();
    let registry: Registry = Rc::new(RefCell::new(HashMap::new()));

    loop {
        let now = Instant::now();
        while let Some(task) = timers.pop_due(now) {
            task();
        }

        let next_deadline = timers.next_deadline();
        tokio::select! {
            biased;

            cmd = rx.recv() => match cmd {
                Some(LoopCommand::Shutdown) => {
                    debug!(loop_index = index, "shutdown requested");
                    // Queued commands still drain; recv returns None
                    // once the queue is empty.
                    rx.close();
                }
                Some(cmd) => handle_command(cmd, index, &mut timers, &registry, &config, &stats),
                None => break,
            },

            _ = tokio::time::sleep_until(next_deadline.unwrap_or(now)), if next_deadline.is_some() => {
                // Due timers run at the top of the loop.
            }
        }
    }

    let handles: Vec<ChannelHandle> = registry.borrow().values().cloned().collect();
    if !handles.is_empty() {
        debug!(
            loop_index = index,
            channels = handles.len(),
            "closing remaining channels"
        );
    }
    for handle in &handles {
        handle.close();
    }
    for handle in handles {
        handle.closed().await;
    }
}

fn handle_command(
    cmd: LoopCommand,
    index: usize,
    timers: &mut TimerQueue,
    registry: &Registry,
    config: &Arc<Config>,
    stats: &Arc<TransportStats>,
) {
    match cmd {
        LoopCommand::Execute(task) => task(),
        LoopCommand::Schedule {
            deadline,
            cancelled,
            task,
        } => {
            timers.insert(deadline, cancelled, task);
        }
        LoopCommand::Register {
            stream,
            init,
            reply,
        } => {
            let result = register_channel(stream, init, index, registry, config, stats);
            match (result, reply) {
                (Ok(handle), Some(tx)) => {
                    let _ = tx.send(Ok(handle));
                }
                (Ok(_), None) => {}
                (Err(e), Some(tx)) => {
                    let _ = tx.send(Err(e));
                }
                (Err(e), None) => {
                    warn!(loop_index = index, error = %e, "failed to register channel");
                }
            }
        }
        LoopCommand::Shutdown => {}
    }
}

fn register_channel(
    stream: std::net::TcpStream,
    init: Initializer,
    index: usize,
    registry: &Registry,
    config: &Arc<Config>,
    stats: &Arc<TransportStats>,
) -> Result<ChannelHandle, Error> {
    stream.set_nonblocking(true)?;
    let _ = stream.set_nodelay(true);
    let peer = stream.peer_addr()?;
    let stream = TcpStream::from_std(stream)?;

    let core = Arc::new(ChannelCore::new(peer));
    let id = core.id;
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let handle = ChannelHandle::new(core.clone(), cmd_tx, closed_rx);

    let mut pipeline = Pipeline::new(core.clone());
    init(&mut pipeline);

    // Callers see an open channel as soon as registration resolves,
    // even if the driver task has not been polled yet.
    core.set_state(ChannelState::Active);
    registry.borrow_mut().insert(id, handle.clone());
    stats.record_open();

    let on_exit = {
        let registry = registry.clone();
        Box::new(move || {
            registry.borrow_mut().remove(&id);
        })
    };
    let driver = ChannelDriver::new(
        core,
        pipeline,
        cmd_rx,
        closed_tx,
        config.clone(),
        stats.clone(),
        on_exit,
    );
    tokio::task::spawn_local(driver.run(stream));

    debug!(loop_index = index, channel = %id, peer = %peer, "channel registered");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Caps, Context, Handler, Message};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn group_of(threads: usize) -> EventLoopGroup {
        EventLoopGroup::new(Config::new().with_event_loop_threads(threads)).unwrap()
    }

    #[test]
    fn test_execute_runs_on_the_loop_thread() {
        let group = group_of(2);
        let (tx, rx) = std_mpsc::channel();

        for event_loop in group.loops() {
            let tx = tx.clone();
            event_loop
                .execute(move || {
                    let name = std::thread::current()
                        .name()
                        .unwrap_or_default()
                        .to_string();
                    tx.send(name).unwrap();
                })
                .unwrap();
        }

        let mut names: Vec<String> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["wireline-loop-0", "wireline-loop-1"]);

        group.shutdown();
    }

    #[test]
    fn test_next_rotates_round_robin() {
        let group = group_of(3);
        let picks: Vec<usize> = (0..6).map(|_| group.next().index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        group.shutdown();
    }

    #[test]
    fn test_scheduled_tasks_fire_in_deadline_order() {
        let group = group_of(1);
        let (tx, rx) = std_mpsc::channel();

        let event_loop = group.next();
        for (label, delay_ms) in [("slow", 60u64), ("fast", 10)] {
            let tx = tx.clone();
            event_loop
                .schedule(Duration::from_millis(delay_ms), move || {
                    tx.send(label).unwrap();
                })
                .unwrap();
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fast");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "slow");
        group.shutdown();
    }

    #[test]
    fn test_equal_delays_fire_in_submission_order() {
        let group = group_of(1);
        let (tx, rx) = std_mpsc::channel();

        let event_loop = group.next();
        for label in ["first", "second", "third"] {
            let tx = tx.clone();
            event_loop
                .schedule(Duration::from_millis(20), move || {
                    tx.send(label).unwrap();
                })
                .unwrap();
        }

        let fired: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec!["first", "second", "third"]);
        group.shutdown();
    }

    #[test]
    fn test_schedule_at_orders_by_absolute_deadline() {
        let group = group_of(1);
        let (tx, rx) = std_mpsc::channel();

        let event_loop = group.next();
        let base = Instant::now();
        // Submitted out of deadline order on purpose.
        for (label, offset_ms) in [("late", 60u64), ("early", 15), ("past", 0)] {
            let tx = tx.clone();
            event_loop
                .schedule_at(base + Duration::from_millis(offset_ms), move || {
                    tx.send(label).unwrap();
                })
                .unwrap();
        }

        let fired: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec!["past", "early", "late"]);
        group.shutdown();
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let group = group_of(1);
        let (tx, rx) = std_mpsc::channel();

        let event_loop = group.next();
        let cancelled = {
            let tx = tx.clone();
            event_loop
                .schedule(Duration::from_millis(30), move || {
                    tx.send("cancelled").unwrap();
                })
                .unwrap()
        };
        cancelled.cancel();

        let live_tx = tx.clone();
        event_loop
            .schedule(Duration::from_millis(60), move || {
                live_tx.send("live").unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "live");
        assert!(rx.try_recv().is_err());
        group.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let group = group_of(1);
        let event_loop = group.next().clone();
        group.shutdown();

        assert!(event_loop.execute(|| {}).is_err());
        assert!(event_loop.schedule(Duration::from_millis(1), || {}).is_err());
    }

    /// Reports which thread each pipeline event ran on.
    struct ThreadReporter {
        tx: std_mpsc::Sender<String>,
    }

    impl Handler for ThreadReporter {
        fn capabilities(&self) -> Caps {
            Caps::INBOUND
        }

        fn on_active(&mut self, ctx: &mut Context<'_>) {
            self.report();
            ctx.fire_active();
        }

        fn on_read(&mut self, _ctx: &mut Context<'_>, _msg: Message) {
            self.report();
        }
    }

    impl ThreadReporter {
        fn report(&self) {
            let name = std::thread::current()
                .name()
                .unwrap_or_default()
                .to_string();
            self.tx.send(name).unwrap();
        }
    }

    #[tokio::test]
    async fn test_channel_events_stay_on_registered_loop() {
        let group = group_of(2);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        let (tx, rx) = std_mpsc::channel();
        let event_loop = group.loops()[1].clone();
        let handle = event_loop
            .register(
                server_side.into_std().unwrap(),
                Box::new(move |pipeline| {
                    pipeline
                        .add_last("reporter", ThreadReporter { tx })
                        .unwrap();
                }),
            )
            .await
            .unwrap();
        assert!(handle.is_open());

        // One active event plus one read event, both on loop 1.
        use tokio::io::AsyncWriteExt;
        let mut client = client;
        client.write_all(b"ping").await.unwrap();

        for _ in 0..2 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(name, "wireline-loop-1");
        }

        drop(client);
        handle.closed().await;
        group.shutdown();
    }
}
