//! Connection Pool
//!
//! Reuses outbound channels per target address instead of reconnecting
//! for every request.
//!
//! ## Lifecycle of an acquire
//!
//! ```text
//!   acquire(target)
//!        │
//!        ├─ idle channel available ──────────► lease it        (reused)
//!        ├─ under max_size ───────────────────► connect        (created)
//!        └─ at capacity ──► wait FIFO ──┬─────► handed a channel
//!                                       └─────► handed a permit, connect
//! ```
//!
//! Dropping a [`PooledChannel`] returns the channel: a live one goes to
//! the eldest live waiter, else back on the idle list; a dead one frees
//! its capacity slot (again favoring the eldest waiter, who reconnects).
//! Waiters that hit `pool_acquire_timeout` fail with
//! [`Error::PoolExhausted`] and are skipped at release time.
//!
//! A background evictor closes idle channels older than `pool_idle_ttl`.
//! Leased channels are never scanned.

use crate::bootstrap::Connector;
use crate::channel::ChannelHandle;
use crate::config::Config;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::runtime::EventLoopGroup;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, trace};

type PipelineInit = Arc<dyn Fn(&mut Pipeline) + Send + Sync>;

/// What a released slot hands to a waiter.
enum Handoff {
    /// A live channel, ready to lease.
    Channel(ChannelHandle),
    /// Capacity freed by a dead channel; the waiter reconnects.
    Permit,
}

struct IdleChannel {
    handle: ChannelHandle,
    since: Instant,
}

#[derive(Default)]
struct TargetPool {
    /// Released channels, oldest at the front. Reuse takes from the back
    /// so the front goes cold and becomes eligible for eviction.
    idle: VecDeque<IdleChannel>,
    /// Parked acquires in arrival order.
    waiters: VecDeque<oneshot::Sender<Handoff>>,
    /// Leased + idle channels counted against `pool_max_size`.
    total: usize,
}

impl TargetPool {
    fn is_unused(&self) -> bool {
        self.total == 0 && self.idle.is_empty() && self.waiters.is_empty()
    }
}

struct PoolInner {
    connector: Connector,
    initializer: PipelineInit,
    config: Arc<Config>,
    targets: Mutex<HashMap<String, TargetPool>>,
    counters: PoolCounters,
}

/// Pool activity counters.
#[derive(Debug, Default)]
pub struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    evicted: AtomicU64,
    discarded: AtomicU64,
}

impl PoolCounters {
    fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections opened by the pool.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Acquires served by an existing channel.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Idle connections closed by the evictor.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Dead connections dropped on reuse or release.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of one target's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Channels counted against capacity (leased + idle).
    pub total: usize,
    /// Channels parked and ready for reuse.
    pub idle: usize,
    /// Acquires currently waiting for capacity.
    pub waiting: usize,
}

/// A per-target pool of reusable outbound channels.
///
/// Acquired channels come wrapped in a [`PooledChannel`] guard that
/// returns them on drop. Needs a tokio runtime: the evictor task spawns
/// on the current one.
///
/// # Example
///
/// ```ignore
/// use wireline::config::Config;
/// use wireline::pool::ConnectionPool;
/// use wireline::runtime::EventLoopGroup;
///
/// let group = EventLoopGroup::new(Config::default())?;
/// let pool = ConnectionPool::new(&group, |pipeline| {
///     // decoder / encoder / client handlers
/// });
///
/// let channel = pool.acquire("127.0.0.1:6379").await?;
/// channel.write(request).await?;
/// // dropping `channel` returns it to the pool
/// ```
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    evictor: PoolEvictor,
}

impl ConnectionPool {
    /// Creates a pool over `group`. Every pooled channel's pipeline is
    /// built by `initializer` on its owning loop thread.
    pub fn new<F>(group: &EventLoopGroup, initializer: F) -> Self
    where
        F: Fn(&mut Pipeline) + Send + Sync + 'static,
    {
        let inner = Arc::new(PoolInner {
            connector: Connector::new(group),
            initializer: Arc::new(initializer),
            config: group.config_handle(),
            targets: Mutex::new(HashMap::new()),
            counters: PoolCounters::default(),
        });
        let evictor = PoolEvictor::start(inner.clone());
        Self { inner, evictor }
    }

    /// Acquires a channel to `target`, reusing an idle one when possible.
    ///
    /// At capacity the call parks FIFO behind earlier acquires and fails
    /// with [`Error::PoolExhausted`] once `pool_acquire_timeout` elapses.
    pub async fn acquire(&self, target: &str) -> Result<PooledChannel, Error> {
        let started = Instant::now();

        let plan = {
            let mut targets = self.inner.targets.lock().unwrap();
            let entry = targets.entry(target.to_string()).or_default();

            let mut reusable = None;
            while let Some(idle) = entry.idle.pop_back() {
                if idle.handle.is_open() {
                    reusable = Some(idle.handle);
                    break;
                }
                entry.total = entry.total.saturating_sub(1);
                self.inner.counters.record_discarded();
                debug!(%target, channel = %idle.handle.id(), "discarding dead pooled channel");
            }

            match reusable {
                Some(handle) => Plan::Ready(handle),
                None if entry.total < self.inner.config.pool_max_size => {
                    // Reserve the slot before the lock drops.
                    entry.total += 1;
                    Plan::Connect
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push_back(tx);
                    trace!(%target, waiting = entry.waiters.len(), "pool at capacity, parking acquire");
                    Plan::Wait(rx)
                }
            }
        };

        match plan {
            Plan::Ready(handle) => {
                self.inner.counters.record_reused();
                Ok(self.lease(target, handle))
            }
            Plan::Connect => self.connect(target).await,
            Plan::Wait(rx) => {
                let deadline = self.inner.config.pool_acquire_timeout;
                match timeout(deadline, rx).await {
                    Ok(Ok(Handoff::Channel(handle))) => {
                        self.inner.counters.record_reused();
                        Ok(self.lease(target, handle))
                    }
                    Ok(Ok(Handoff::Permit)) => self.connect(target).await,
                    // Sender dropped: the pool is going away.
                    Ok(Err(_)) | Err(_) => Err(Error::PoolExhausted {
                        target: target.to_string(),
                        waited: started.elapsed(),
                    }),
                }
            }
        }
    }

    /// Snapshot of one target's slots, idles, and waiters.
    pub fn status(&self, target: &str) -> PoolStatus {
        let targets = self.inner.targets.lock().unwrap();
        match targets.get(target) {
            Some(entry) => PoolStatus {
                total: entry.total,
                idle: entry.idle.len(),
                waiting: entry.waiters.len(),
            },
            None => PoolStatus {
                total: 0,
                idle: 0,
                waiting: 0,
            },
        }
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.inner.counters
    }

    /// Stops the evictor and closes every idle channel. Leased channels
    /// are unaffected; they are discarded when their guards drop.
    pub fn shutdown(self) {
        self.evictor.stop();
        let mut targets = self.inner.targets.lock().unwrap();
        for (target, entry) in targets.iter_mut() {
            for idle in entry.idle.drain(..) {
                debug!(%target, channel = %idle.handle.id(), "closing pooled channel on shutdown");
                idle.handle.close();
                entry.total = entry.total.saturating_sub(1);
            }
        }
        targets.clear();
    }

    /// Opens a fresh channel for an already-reserved slot.
    async fn connect(&self, target: &str) -> Result<PooledChannel, Error> {
        let init = self.inner.initializer.clone();
        match self
            .inner
            .connector
            .connect(target, move |pipeline| init(pipeline))
            .await
        {
            Ok(handle) => {
                self.inner.counters.record_created();
                debug!(%target, channel = %handle.id(), "pooled channel opened");
                Ok(self.lease(target, handle))
            }
            Err(e) => {
                release_slot(&self.inner, target);
                Err(e)
            }
        }
    }

    fn lease(&self, target: &str, handle: ChannelHandle) -> PooledChannel {
        PooledChannel {
            handle,
            target: target.to_string(),
            inner: self.inner.clone(),
        }
    }
}

enum Plan {
    Ready(ChannelHandle),
    Connect,
    Wait(oneshot::Receiver<Handoff>),
}

/// A leased channel. Dereferences to [`ChannelHandle`]; dropping it
/// returns the channel to its pool.
pub struct PooledChannel {
    handle: ChannelHandle,
    target: String,
    inner: Arc<PoolInner>,
}

impl PooledChannel {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Deref for PooledChannel {
    type Target = ChannelHandle;

    fn deref(&self) -> &ChannelHandle {
        &self.handle
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        release(&self.inner, &self.target, self.handle.clone());
    }
}

impl std::fmt::Debug for PooledChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledChannel")
            .field("channel", &self.handle.id())
            .field("target", &self.target)
            .finish()
    }
}

/// Returns a channel to the pool when its guard drops.
fn release(inner: &Arc<PoolInner>, target: &str, handle: ChannelHandle) {
    if !handle.is_open() {
        inner.counters.record_discarded();
        debug!(%target, channel = %handle.id(), "released channel is dead");
        release_slot(inner, target);
        return;
    }

    let mut targets = inner.targets.lock().unwrap();
    let Some(entry) = targets.get_mut(target) else {
        // Pool shut down while this lease was out.
        drop(targets);
        handle.close();
        inner.counters.record_discarded();
        return;
    };

    // A send only fails when that waiter already timed out; skip it.
    while let Some(waiter) = entry.waiters.pop_front() {
        if waiter.send(Handoff::Channel(handle.clone())).is_ok() {
            return;
        }
    }

    trace!(%target, channel = %handle.id(), "channel parked idle");
    entry.idle.push_back(IdleChannel {
        handle,
        since: Instant::now(),
    });
}

/// Frees one capacity slot, preferring to convert it into a connect
/// permit for the eldest live waiter.
fn release_slot(inner: &Arc<PoolInner>, target: &str) {
    let mut targets = inner.targets.lock().unwrap();
    let Some(entry) = targets.get_mut(target) else {
        return;
    };

    while let Some(waiter) = entry.waiters.pop_front() {
        if waiter.send(Handoff::Permit).is_ok() {
            return;
        }
    }

    entry.total = entry.total.saturating_sub(1);
    if entry.is_unused() {
        targets.remove(target);
    }
}

/// Background task closing idle channels past their TTL. Stops when the
/// handle drops.
struct PoolEvictor {
    shutdown_tx: watch::Sender<bool>,
}

impl PoolEvictor {
    fn start(inner: Arc<PoolInner>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(evict_loop(inner, shutdown_rx));
        info!("pool evictor started");
        Self { shutdown_tx }
    }

    fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for PoolEvictor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn evict_loop(inner: Arc<PoolInner>, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = inner.config.pool_evict_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("pool evictor received shutdown signal");
                    return;
                }
            }
        }
        sweep(&inner);
    }
}

/// One eviction pass: expired and dead idle channels are closed and
/// their slots freed. Leased channels are untouched.
fn sweep(inner: &PoolInner) {
    let ttl = inner.config.pool_idle_ttl;
    let now = Instant::now();
    let mut evicted = 0u64;

    let mut targets = inner.targets.lock().unwrap();
    for (target, entry) in targets.iter_mut() {
        while let Some(front) = entry.idle.front() {
            let expired = now.duration_since(front.since) >= ttl;
            if !expired && front.handle.is_open() {
                break;
            }
            if let Some(idle) = entry.idle.pop_front() {
                entry.total = entry.total.saturating_sub(1);
                if expired {
                    debug!(%target, channel = %idle.handle.id(), "evicting idle channel");
                    idle.handle.close();
                    inner.counters.record_evicted();
                    evicted += 1;
                } else {
                    inner.counters.record_discarded();
                }
            }
        }
    }
    targets.retain(|_, entry| !entry.is_unused());
    drop(targets);

    if evicted > 0 {
        debug!(evicted, "eviction sweep finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::ServerBootstrap;
    use std::sync::mpsc as std_mpsc;

    fn quiet_server(group: &EventLoopGroup) -> crate::bootstrap::Server {
        ServerBootstrap::new(group)
            .initializer(|_pipeline| {})
            .bind("127.0.0.1:0")
            .unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_released_channel() {
        let group = EventLoopGroup::new(Config::new().with_event_loop_threads(1)).unwrap();
        let server = quiet_server(&group);
        let target = server.local_addr().to_string();
        let pool = ConnectionPool::new(&group, |_| {});

        let first = pool.acquire(&target).await.unwrap();
        let first_id = first.id();
        drop(first);

        let second = pool.acquire(&target).await.unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(pool.counters().created(), 1);
        assert_eq!(pool.counters().reused(), 1);

        drop(second);
        pool.shutdown();
        drop(server);
        group.shutdown();
    }

    #[tokio::test]
    async fn test_dead_channel_is_discarded_and_replaced() {
        let group = EventLoopGroup::new(Config::new().with_event_loop_threads(1)).unwrap();
        let server = quiet_server(&group);
        let target = server.local_addr().to_string();
        let pool = ConnectionPool::new(&group, |_| {});

        let first = pool.acquire(&target).await.unwrap();
        let first_id = first.id();
        first.close();
        first.closed().await;
        drop(first);

        let second = pool.acquire(&target).await.unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(pool.counters().created(), 2);
        assert_eq!(pool.counters().discarded(), 1);
        assert_eq!(pool.counters().reused(), 0);

        drop(second);
        pool.shutdown();
        drop(server);
        group.shutdown();
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let config = Config::new()
            .with_event_loop_threads(1)
            .with_pool_max_size(1)
            .with_pool_acquire_timeout(Duration::from_millis(50));
        let group = EventLoopGroup::new(config).unwrap();
        let server = quiet_server(&group);
        let target = server.local_addr().to_string();
        let pool = ConnectionPool::new(&group, |_| {});

        let held = pool.acquire(&target).await.unwrap();

        let started = Instant::now();
        let err = pool.acquire(&target).await.unwrap_err();
        match err {
            Error::PoolExhausted { target: t, waited } => {
                assert_eq!(t, target);
                assert!(waited >= Duration::from_millis(40));
            }
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(4));

        drop(held);
        pool.shutdown();
        drop(server);
        group.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_waiters_are_served_in_fifo_order() {
        let config = Config::new()
            .with_event_loop_threads(1)
            .with_pool_max_size(1)
            .with_pool_acquire_timeout(Duration::from_secs(10));
        let group = EventLoopGroup::new(config).unwrap();
        let server = quiet_server(&group);
        let target = server.local_addr().to_string();
        let pool = Arc::new(ConnectionPool::new(&group, |_| {}));

        let held = pool.acquire(&target).await.unwrap();
        assert_eq!(pool.status(&target).total, 1);

        let (order_tx, order_rx) = std_mpsc::channel();
        let mut tasks = Vec::new();
        for i in 0..3u32 {
            let task = {
                let pool = pool.clone();
                let target = target.clone();
                let order_tx = order_tx.clone();
                tokio::spawn(async move {
                    let lease = pool.acquire(&target).await.unwrap();
                    order_tx.send(i).unwrap();
                    drop(lease);
                })
            };
            tasks.push(task);
            // Park each waiter before spawning the next so arrival order
            // is the spawn order.
            let pool = pool.clone();
            let target = target.clone();
            wait_for("waiter to park", move || {
                pool.status(&target).waiting == (i + 1) as usize
            })
            .await;
        }

        drop(held);

        let served: Vec<u32> = (0..3)
            .map(|_| order_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(served, vec![0, 1, 2]);
        assert_eq!(pool.counters().created(), 1);
        assert_eq!(pool.counters().reused(), 3);

        for task in tasks {
            task.await.unwrap();
        }
        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.shutdown(),
            Err(_) => panic!("pool still shared"),
        }
        drop(server);
        group.shutdown();
    }

    #[tokio::test]
    async fn test_failed_connect_frees_its_slot() {
        let config = Config::new()
            .with_event_loop_threads(1)
            .with_pool_max_size(1)
            .with_pool_acquire_timeout(Duration::from_millis(100));
        let group = EventLoopGroup::new(config).unwrap();
        let pool = ConnectionPool::new(&group, |_| {});

        // Bind then drop to get a refusing port.
        let target = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        for _ in 0..3 {
            let err = pool.acquire(&target).await.unwrap_err();
            assert!(matches!(err, Error::Io(_)), "slot leak turns refusals into timeouts");
        }
        assert_eq!(pool.status(&target).total, 0);

        pool.shutdown();
        group.shutdown();
    }

    #[tokio::test]
    async fn test_evictor_closes_idle_channels() {
        let config = Config::new()
            .with_event_loop_threads(1)
            .with_pool_idle_ttl(Duration::from_millis(50))
            .with_pool_evict_interval(Duration::from_millis(20));
        let group = EventLoopGroup::new(config).unwrap();
        let server = quiet_server(&group);
        let target = server.local_addr().to_string();
        let pool = ConnectionPool::new(&group, |_| {});

        let lease = pool.acquire(&target).await.unwrap();
        let handle = lease.deref().clone();
        drop(lease);
        assert_eq!(pool.status(&target).idle, 1);

        handle.closed().await;
        wait_for("idle channel eviction", || pool.status(&target).idle == 0).await;
        assert_eq!(pool.counters().evicted(), 1);

        pool.shutdown();
        drop(server);
        group.shutdown();
    }

    #[tokio::test]
    async fn test_leased_channels_are_never_evicted() {
        let config = Config::new()
            .with_event_loop_threads(1)
            .with_pool_idle_ttl(Duration::from_millis(20))
            .with_pool_evict_interval(Duration::from_millis(10));
        let group = EventLoopGroup::new(config).unwrap();
        let server = quiet_server(&group);
        let target = server.local_addr().to_string();
        let pool = ConnectionPool::new(&group, |_| {});

        let lease = pool.acquire(&target).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(lease.is_open());
        assert_eq!(pool.counters().evicted(), 0);
        assert_eq!(pool.status(&target).total, 1);

        drop(lease);
        pool.shutdown();
        drop(server);
        group.shutdown();
    }

    #[tokio::test]
    async fn test_status_for_unknown_target_is_empty() {
        let group = EventLoopGroup::new(Config::new().with_event_loop_threads(1)).unwrap();
        let pool = ConnectionPool::new(&group, |_| {});

        // Status lookups never allocate buckets.
        let status = pool.status("203.0.113.1:6379");
        assert_eq!(
            status,
            PoolStatus {
                total: 0,
                idle: 0,
                waiting: 0
            }
        );

        pool.shutdown();
        group.shutdown();
    }
}
