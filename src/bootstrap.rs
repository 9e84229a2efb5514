//! Transport Bootstrap
//!
//! The two entry points for getting channels into an
//! [`EventLoopGroup`](crate::runtime::EventLoopGroup):
//!
//! - [`ServerBootstrap`] binds a listener and runs an acceptor task on the
//!   first loop. Accepted sockets are registered round-robin across the
//!   whole group, each with a pipeline built by the shared initializer.
//! - [`Connector`] opens outbound connections, bounded by the configured
//!   connect timeout, and registers them the same way.
//!
//! ```text
//!        bind()                        connect()
//!          │                               │
//!   ┌──────▼──────┐                 ┌──────▼──────┐
//!   │  acceptor   │                 │  Connector  │
//!   │  (loop 0)   │                 └──────┬──────┘
//!   └──────┬──────┘                        │
//!          │ register round-robin          │ register round-robin
//!   ┌──────▼───────────────────────────────▼──────┐
//!   │              EventLoopGroup                 │
//!   └─────────────────────────────────────────────┘
//! ```

use crate::channel::ChannelHandle;
use crate::config::Config;
use crate::error::{Error, TimeoutKind};
use crate::pipeline::Pipeline;
use crate::runtime::{EventLoop, EventLoopGroup};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

type SharedInitializer = Arc<dyn Fn(&mut Pipeline) + Send + Sync>;

/// Builds a listening server on top of an event loop group.
///
/// # Example
///
/// ```ignore
/// use wireline::bootstrap::ServerBootstrap;
/// use wireline::codec::{RespDecoder, RespEncoder};
/// use wireline::config::Config;
/// use wireline::runtime::EventLoopGroup;
///
/// let group = EventLoopGroup::new(Config::default())?;
/// let server = ServerBootstrap::new(&group)
///     .initializer(|pipeline| {
///         let config = Config::default();
///         pipeline.add_last("decoder", RespDecoder::new(&config)).unwrap();
///         pipeline.add_last("encoder", RespEncoder::new()).unwrap();
///     })
///     .bind("127.0.0.1:6379")?;
/// println!("listening on {}", server.local_addr());
/// ```
pub struct ServerBootstrap<'a> {
    group: &'a EventLoopGroup,
    initializer: Option<SharedInitializer>,
}

impl<'a> ServerBootstrap<'a> {
    pub fn new(group: &'a EventLoopGroup) -> Self {
        Self {
            group,
            initializer: None,
        }
    }

    /// Sets the closure that populates each accepted channel's pipeline.
    /// Runs on the channel's owning loop thread.
    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Pipeline) + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(f));
        self
    }

    /// Binds `addr` and starts accepting. The acceptor runs on the group's
    /// first loop; accepted channels are spread round-robin over all loops.
    ///
    /// The returned [`Server`] stops the acceptor when shut down or dropped.
    /// Channels already accepted live until they close or the group shuts
    /// down.
    pub fn bind<A: std::net::ToSocketAddrs>(&self, addr: A) -> Result<Server, Error> {
        let initializer = self.initializer.clone().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "server bootstrap has no initializer",
            ))
        })?;

        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let loops = self.group.loops().to_vec();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // The listener converts to tokio on the loop thread so it lands on
        // that thread's reactor.
        self.group.loops()[0].execute(move || {
            match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => {
                    tokio::task::spawn_local(accept_loop(listener, loops, initializer, shutdown_rx));
                }
                Err(e) => error!(error = %e, "failed to adopt listener"),
            }
        })?;

        info!(addr = %local_addr, "server listening");
        Ok(Server {
            local_addr,
            shutdown: shutdown_tx,
        })
    }
}

/// A running acceptor. Dropping it stops accepting new connections.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// The actual bound address, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the acceptor and releases the port.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    loops: Vec<EventLoop>,
    initializer: SharedInitializer,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut next = 0usize;
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    break;
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "accepted connection");
                    let stream = match stream.into_std() {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(%peer, error = %e, "failed to detach accepted socket");
                            continue;
                        }
                    };
                    let event_loop = &loops[next % loops.len()];
                    next = next.wrapping_add(1);
                    let init = initializer.clone();
                    let register = event_loop
                        .register_detached(stream, Box::new(move |pipeline| init(pipeline)));
                    if register.is_err() {
                        warn!(%peer, "event loop rejected connection");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    // Brief pause so a persistent accept error does not spin.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
    debug!("acceptor stopped");
}

/// Opens outbound channels through an event loop group.
///
/// Cheap to clone; clones share the round-robin cursor.
#[derive(Debug, Clone)]
pub struct Connector {
    loops: Vec<EventLoop>,
    config: Arc<Config>,
    next: Arc<AtomicUsize>,
}

impl Connector {
    pub fn new(group: &EventLoopGroup) -> Self {
        Self {
            loops: group.loops().to_vec(),
            config: group.config_handle(),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connects to `target`, bounded by the configured connect timeout, and
    /// registers the channel with the next loop. The initializer populates
    /// the new channel's pipeline on its loop thread.
    pub async fn connect<F>(&self, target: &str, init: F) -> Result<ChannelHandle, Error>
    where
        F: FnOnce(&mut Pipeline) + Send + 'static,
    {
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                debug!(%target, "connect timed out");
                return Err(Error::Timeout(TimeoutKind::Connect));
            }
        };
        let stream = stream.into_std()?;

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        let handle = self.loops[idx].register(stream, Box::new(init)).await?;
        debug!(%target, channel = %handle.id(), "connected");
        Ok(handle)
    }
}
