//! # mill-tcp
//! An asynchronous TCP connection core on a single-threaded [`mio`] reactor: a
//! server that accepts and tracks connections, per-connection ordered write
//! queues, broadcast, and a client that resolves, connects and reconnects.
//!
//! No async runtime is involved. Every [`TcpServer`] and [`TcpClient`] owns one
//! event loop; all socket I/O and all handler callbacks run serially on the
//! thread that calls `run()`. `write()` and `stop()` may be called from any
//! thread and are posted to the loop.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ EventLoop   │───▶│   Reactor    │───▶│ PollHandle  │
//! └─────────────┘    └──────────────┘    └─────────────┘
//!        ▲                   │ events, commands, deadlines
//!        │ post()            ▼
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ LoopHandle  │    │ EventHandler │───▶│ Connection  │
//! └─────────────┘    │ (server or   │    │  registry   │
//!                    │  client core)│    └─────────────┘
//!                    └──────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_tcp::{ConnectionRef, TcpServer};
//!
//! fn main() -> mill_tcp::Result<()> {
//!     let server = TcpServer::bind(8080, |data: &[u8], conn: &ConnectionRef| {
//!         conn.write(data);
//!     })?;
//!     server.run()
//! }
//! ```
//!
//! - [`net::tcp`]: server, client, connection and registry
//! - [`reactor`]: the single-threaded loop and its cross-thread [`LoopHandle`]
//! - [`object_pool`]: recycled read buffers
//! - [`thread_pool`]: workers for blocking name resolution
//! - [`error`]: error types and result handling

use std::sync::Mutex;
use std::time::Duration;

use mio::Registry;

pub mod error;
pub mod handler;
pub mod net;
pub mod object_pool;
pub mod poll;
pub mod reactor;
pub mod thread_pool;

pub use error::{NetworkError, Result};
pub use handler::EventHandler;
pub use net::tcp::{
    ClientHandle, ClientHandler, ConnectionId, ConnectionRef, ReconnectPolicy, ServerHandle,
    ServerHandler, TcpClient, TcpClientConfig, TcpServer, TcpServerConfig,
};
pub use object_pool::{ObjectPool, PooledBuffer};
pub use reactor::LoopHandle;

use crate::reactor::{Reactor, DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS};

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use mill_tcp::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{NetworkError, Result};
    pub use crate::handler::EventHandler;
    pub use crate::net::tcp::{
        ClientHandler, ConnectionId, ConnectionRef, ReconnectPolicy, ServerHandler, TcpClient,
        TcpClientConfig, TcpServer, TcpServerConfig,
    };
    pub use crate::reactor::LoopHandle;
}

/// A single-threaded event loop driving one [`EventHandler`].
///
/// `run()` blocks the calling thread until [`stop()`](EventLoop::stop) is
/// called from anywhere. The loop runs once: a second concurrent `run()` fails
/// with [`NetworkError::AlreadyRunning`], and `run()` after the loop stopped
/// returns immediately.
///
/// ## Example
///
/// ```rust,no_run
/// use mill_tcp::{EventHandler, EventLoop};
/// use mio::{event::Event, Registry};
///
/// struct Counter(u64);
///
/// impl EventHandler for Counter {
///     type Command = u64;
///     fn handle_event(&mut self, _: &Registry, _: &Event) {}
///     fn handle_command(&mut self, _: &Registry, n: u64) {
///         self.0 += n;
///     }
///     fn shutdown(&mut self, _: &Registry) {}
/// }
///
/// let event_loop = EventLoop::<Counter>::new(|_registry, _handle| Ok(Counter(0))).unwrap();
/// event_loop.post(5);
/// event_loop.stop();
/// event_loop.run().unwrap();
/// ```
pub struct EventLoop<H: EventHandler> {
    reactor: Mutex<Option<Reactor<H>>>,
    handle: LoopHandle<H::Command>,
}

impl<H: EventHandler> EventLoop<H> {
    /// Creates a loop with the default event capacity and poll timeout.
    pub fn new<F>(init: F) -> Result<Self>
    where
        F: FnOnce(&Registry, LoopHandle<H::Command>) -> Result<H>,
    {
        Self::with_capacity(
            DEFAULT_EVENTS_CAPACITY,
            Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            init,
        )
    }

    /// Creates a loop. `init` builds the handler on the new poll registry and
    /// receives a handle for posting back into the loop.
    pub fn with_capacity<F>(events_capacity: usize, poll_timeout: Duration, init: F) -> Result<Self>
    where
        F: FnOnce(&Registry, LoopHandle<H::Command>) -> Result<H>,
    {
        if events_capacity == 0 {
            return Err(NetworkError::Configuration(
                "events_capacity must be non-zero".into(),
            ));
        }
        let (reactor, handle) = Reactor::new(events_capacity, poll_timeout, init)?;
        Ok(Self {
            reactor: Mutex::new(Some(reactor)),
            handle,
        })
    }

    /// Drives the loop on the calling thread until [`stop()`](EventLoop::stop).
    pub fn run(&self) -> Result<()> {
        let reactor = self
            .reactor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match reactor {
            Some(mut reactor) => {
                let result = reactor.run();
                self.handle.shutdown();
                result
            }
            None if self.handle.is_shutdown() => Ok(()),
            None => Err(NetworkError::AlreadyRunning),
        }
    }

    /// Stops the loop and unblocks `run()`. Idempotent and callable from any
    /// thread.
    pub fn stop(&self) {
        self.handle.shutdown();
    }

    /// Posts a command to the handler. Returns `false`, dropping the command,
    /// once the loop is stopping.
    pub fn post(&self, command: H::Command) -> bool {
        self.handle.post(command)
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_shutdown()
    }

    pub fn handle(&self) -> LoopHandle<H::Command> {
        self.handle.clone()
    }
}
