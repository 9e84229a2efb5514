//! Transport Configuration
//!
//! A single [`Config`] value is shared by the event loop group, channels,
//! the codec layer and the connection pool. Every knob has a default that
//! works for local testing; production deployments override the handful
//! they care about with the `with_*` builders or environment variables.

use std::time::Duration;
use tracing::warn;

/// Default cap on a single decoded frame, mirrors the codec limit.
pub const DEFAULT_MAX_FRAME_SIZE: usize = crate::codec::MAX_FRAME_SIZE;

/// Default TCP connect deadline (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default write-queue high watermark (64 KB)
pub const DEFAULT_WRITE_HIGH_WATERMARK: usize = 64 * 1024;

/// Default write-queue low watermark (32 KB)
pub const DEFAULT_WRITE_LOW_WATERMARK: usize = 32 * 1024;

/// Default per-target connection pool capacity
pub const DEFAULT_POOL_MAX_SIZE: usize = 8;

/// Default deadline for a pool acquire before it reports exhaustion (5 seconds)
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TTL for idle pooled connections (60 seconds)
pub const DEFAULT_POOL_IDLE_TTL: Duration = Duration::from_secs(60);

/// Default interval between pool eviction sweeps (5 seconds)
pub const DEFAULT_POOL_EVICT_INTERVAL: Duration = Duration::from_secs(5);

/// Recognized transport options.
///
/// # Example
///
/// ```ignore
/// use wireline::Config;
/// use std::time::Duration;
///
/// let config = Config::default()
///     .with_event_loop_threads(4)
///     .with_idle_timeout(Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a single decoded frame in bytes.
    pub max_frame_size: usize,

    /// Close a channel after this long without read or write activity.
    /// `None` disables idle tracking.
    pub idle_timeout: Option<Duration>,

    /// Deadline for establishing an outbound TCP connection.
    pub connect_timeout: Duration,

    /// Number of event loop threads in a group.
    pub event_loop_threads: usize,

    /// Queue depth at which a channel reports itself unwritable.
    pub write_high_watermark: usize,

    /// Queue depth at which a channel becomes writable again.
    pub write_low_watermark: usize,

    /// Maximum live connections per pool target.
    pub pool_max_size: usize,

    /// How long an acquire waits for a free connection before failing.
    pub pool_acquire_timeout: Duration,

    /// Idle pooled connections older than this are closed by the evictor.
    pub pool_idle_ttl: Duration,

    /// Interval between pool eviction sweeps.
    pub pool_evict_interval: Duration,

    /// Accept inline (space-separated, non-prefixed) commands when decoding.
    pub decode_inline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            idle_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_loop_threads: default_thread_count(),
            write_high_watermark: DEFAULT_WRITE_HIGH_WATERMARK,
            write_low_watermark: DEFAULT_WRITE_LOW_WATERMARK,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            pool_acquire_timeout: DEFAULT_POOL_ACQUIRE_TIMEOUT,
            pool_idle_ttl: DEFAULT_POOL_IDLE_TTL,
            pool_evict_interval: DEFAULT_POOL_EVICT_INTERVAL,
            decode_inline: false,
        }
    }
}

impl Config {
    /// Creates a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration overrides from `WIRELINE_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(v) = env_usize("WIRELINE_MAX_FRAME_SIZE") {
            config.max_frame_size = v;
        }
        if let Some(ms) = env_u64("WIRELINE_IDLE_TIMEOUT_MS") {
            config.idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = env_u64("WIRELINE_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_usize("WIRELINE_EVENT_LOOP_THREADS") {
            config.event_loop_threads = v.max(1);
        }
        if let Some(v) = env_usize("WIRELINE_POOL_MAX_SIZE") {
            config.pool_max_size = v.max(1);
        }
        if let Some(ms) = env_u64("WIRELINE_POOL_ACQUIRE_TIMEOUT_MS") {
            config.pool_acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("WIRELINE_POOL_IDLE_TTL_MS") {
            config.pool_idle_ttl = Duration::from_millis(ms);
        }

        config
    }

    /// Sets the maximum decoded frame size.
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Sets or disables the per-channel idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the outbound connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the number of event loop threads in a group.
    pub fn with_event_loop_threads(mut self, threads: usize) -> Self {
        self.event_loop_threads = threads.max(1);
        self
    }

    /// Sets both write watermarks. `low` must not exceed `high`.
    pub fn with_write_watermarks(mut self, high: usize, low: usize) -> Self {
        debug_assert!(low <= high, "low watermark above high watermark");
        self.write_high_watermark = high;
        self.write_low_watermark = low.min(high);
        self
    }

    /// Sets the per-target pool capacity.
    pub fn with_pool_max_size(mut self, size: usize) -> Self {
        self.pool_max_size = size.max(1);
        self
    }

    /// Sets the pool acquire deadline.
    pub fn with_pool_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_acquire_timeout = timeout;
        self
    }

    /// Sets the idle TTL for pooled connections.
    pub fn with_pool_idle_ttl(mut self, ttl: Duration) -> Self {
        self.pool_idle_ttl = ttl;
        self
    }

    /// Sets the interval between pool eviction sweeps.
    pub fn with_pool_evict_interval(mut self, interval: Duration) -> Self {
        self.pool_evict_interval = interval;
        self
    }

    /// Enables or disables inline command decoding.
    pub fn with_decode_inline(mut self, enabled: bool) -> Self {
        self.decode_inline = enabled;
        self
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring malformed environment override");
            None
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring malformed environment override");
            None
        }
    }
}
