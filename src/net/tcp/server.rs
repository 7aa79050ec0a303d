use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::{debug, info, warn};

use super::channel::TcpChannel;
use super::config::TcpServerConfig;
use super::connection::Connection;
use super::registry::ConnectionRegistry;
use super::traits::{ConnectionId, ServerHandler};
use crate::error::{NetworkError, Result};
use crate::handler::EventHandler;
use crate::object_pool::ObjectPool;
use crate::reactor::LoopHandle;
use crate::EventLoop;

const LISTENER_TOKEN: Token = Token(1);
// Ids double as poll tokens; 0 and 1 belong to the waker and the listener.
const FIRST_CONNECTION_ID: u64 = 2;
const MAX_IDLE_BUFFERS: usize = 64;
// Backlogged sockets raise no new edge, so a failed accept is retried on a timer.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Requests posted to a server loop from other threads.
pub(crate) enum ServerCommand {
    Write { id: ConnectionId, bytes: Vec<u8> },
    Broadcast(Vec<u8>),
    Close(ConnectionId),
}

/// Handle to one accepted connection, passed to [`ServerHandler`] callbacks.
///
/// Cloneable and usable from any thread; operations are posted to the server
/// loop and silently dropped once the connection or the server is gone.
#[derive(Clone)]
pub struct ConnectionRef {
    id: ConnectionId,
    handle: LoopHandle<ServerCommand>,
}

impl ConnectionRef {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `bytes` on this connection only.
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.handle.post(ServerCommand::Write { id: self.id, bytes });
    }

    /// Stops this connection and removes it from the registry.
    pub fn close(&self) {
        self.handle.post(ServerCommand::Close(self.id));
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRef").field("id", &self.id).finish()
    }
}

/// Loop-side state of a [`TcpServer`]: the acceptor, the registry and the
/// application handler.
pub(crate) struct ServerCore<H: ServerHandler> {
    listener: Option<TcpListener>,
    connections: ConnectionRegistry,
    handler: H,
    config: TcpServerConfig,
    buffers: ObjectPool,
    next_id: u64,
    accept_retry_at: Option<Instant>,
    handle: LoopHandle<ServerCommand>,
}

impl<H: ServerHandler> ServerCore<H> {
    fn conn_ref(&self, id: ConnectionId) -> ConnectionRef {
        ConnectionRef {
            id,
            handle: self.handle.clone(),
        }
    }

    fn accept(&mut self, registry: &Registry) {
        loop {
            // A closed acceptor ends the accept loop.
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.admit(registry, stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!(error = %e, "transient accept error");
                    continue;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = ACCEPT_RETRY_DELAY.as_millis() as u64,
                        "accept failed"
                    );
                    self.handler.on_error(None, &NetworkError::Io(e));
                    self.accept_retry_at = Some(Instant::now() + ACCEPT_RETRY_DELAY);
                    break;
                }
            }
        }
    }

    fn admit(&mut self, registry: &Registry, stream: TcpStream, peer_addr: SocketAddr) {
        if let Some(max) = self.config.max_connections {
            if self.connections.size() >= max {
                warn!(%peer_addr, max, "max connections reached, rejecting");
                return;
            }
        }

        if let Err(e) = stream.set_nodelay(self.config.no_delay) {
            warn!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let connection = Connection::new(id, TcpChannel::new(stream), self.buffers.acquire());
        match self.connections.add(registry, connection) {
            Ok(()) => {
                info!(conn_id = %id, %peer_addr, "new connection");
                let conn = self.conn_ref(id);
                self.handler.on_connect(&conn);
            }
            Err(e) => {
                warn!(conn_id = %id, %peer_addr, error = %e, "failed to start connection");
                self.handler.on_error(Some(id), &e);
            }
        }
    }

    fn handle_connection_event(&mut self, registry: &Registry, id: ConnectionId, event: &Event) {
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            let conn = self.conn_ref(id);
            let Self {
                connections,
                handler,
                ..
            } = &mut *self;
            let result = match connections.get_mut(id) {
                Some(connection) => connection.on_readable(registry, |data| handler.on_data(&conn, data)),
                None => return,
            };
            if let Err(e) = result {
                self.retire(registry, id, e);
                return;
            }
        }

        if event.is_writable() {
            let result = match self.connections.get_mut(id) {
                Some(connection) => connection.on_writable(registry),
                None => return,
            };
            if let Err(e) = result {
                self.retire(registry, id, e);
            }
        }
    }

    /// Removes a connection whose read or write loop failed. Cancellations
    /// come from a deliberate stop and are not failures.
    fn retire(&mut self, registry: &Registry, id: ConnectionId, error: NetworkError) {
        if error.is_cancellation() {
            return;
        }
        if !self.connections.remove(registry, id) {
            return;
        }
        if matches!(error, NetworkError::PeerClosed) {
            debug!(conn_id = %id, "peer closed connection");
        } else {
            warn!(conn_id = %id, error = %error, "connection retired");
            self.handler.on_error(Some(id), &error);
        }
        self.handler.on_disconnect(id);
    }
}

impl<H: ServerHandler> EventHandler for ServerCore<H> {
    type Command = ServerCommand;

    fn handle_event(&mut self, registry: &Registry, event: &Event) {
        match event.token() {
            LISTENER_TOKEN => self.accept(registry),
            token => {
                let id = ConnectionId::new(token.0 as u64);
                self.handle_connection_event(registry, id, event);
            }
        }
    }

    fn handle_command(&mut self, registry: &Registry, command: ServerCommand) {
        match command {
            ServerCommand::Write { id, bytes } => {
                if let Err(e) = self.connections.write_to(registry, id, bytes) {
                    self.retire(registry, id, e);
                }
            }
            ServerCommand::Broadcast(bytes) => {
                for (id, e) in self.connections.broadcast(registry, &bytes) {
                    self.retire(registry, id, e);
                }
            }
            ServerCommand::Close(id) => {
                if self.connections.remove(registry, id) {
                    debug!(conn_id = %id, "connection closed");
                    self.handler.on_disconnect(id);
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.accept_retry_at
    }

    fn handle_timeout(&mut self, registry: &Registry, now: Instant) {
        if matches!(self.accept_retry_at, Some(at) if at <= now) {
            self.accept_retry_at = None;
            self.accept(registry);
        }
    }

    fn shutdown(&mut self, registry: &Registry) {
        self.accept_retry_at = None;
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = registry.deregister(&mut listener) {
                debug!(error = %e, "failed to deregister listener");
            }
        }
        for id in self.connections.remove_all(registry) {
            self.handler.on_disconnect(id);
        }
        info!("server stopped");
    }
}

/// A TCP server running on its own single-threaded event loop.
///
/// Binding happens at construction; connections are accepted once
/// [`run()`](TcpServer::run) drives the loop. Every accepted socket becomes a
/// connection with its own read loop and ordered write queue.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::thread;
/// use mill_tcp::{ConnectionRef, TcpServer};
///
/// let server = Arc::new(TcpServer::bind(0, |data: &[u8], conn: &ConnectionRef| {
///     conn.write(data);
/// })?);
/// let runner = {
///     let server = Arc::clone(&server);
///     thread::spawn(move || server.run())
/// };
///
/// server.write(b"hello everyone".to_vec());
/// server.stop();
/// runner.join().unwrap()?;
/// # Ok::<(), mill_tcp::NetworkError>(())
/// ```
pub struct TcpServer<H: ServerHandler> {
    event_loop: EventLoop<ServerCore<H>>,
    local_addr: SocketAddr,
    connection_count: Arc<AtomicUsize>,
}

impl<H: ServerHandler> TcpServer<H> {
    /// Binds `0.0.0.0:port`; port 0 picks an ephemeral port.
    pub fn bind(port: u16, handler: H) -> Result<Self> {
        Self::with_config(TcpServerConfig::with_port(port), handler)
    }

    pub fn with_config(config: TcpServerConfig, handler: H) -> Result<Self> {
        if config.buffer_size == 0 {
            return Err(NetworkError::Configuration(
                "buffer_size must be non-zero".into(),
            ));
        }

        let address = config.address;
        let mut listener = TcpListener::bind(address)
            .map_err(|source| NetworkError::Bind { addr: address, source })?;
        let local_addr = listener.local_addr()?;

        let connection_count = Arc::new(AtomicUsize::new(0));
        let connections = ConnectionRegistry::with_counter(Arc::clone(&connection_count));
        let buffers = ObjectPool::new(config.buffer_size, MAX_IDLE_BUFFERS);

        let event_loop = EventLoop::<ServerCore<H>>::with_capacity(
            config.events_capacity,
            config.poll_timeout,
            move |registry, handle| {
                registry.register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
                Ok(ServerCore {
                    listener: Some(listener),
                    connections,
                    handler,
                    config,
                    buffers,
                    next_id: FIRST_CONNECTION_ID,
                    accept_retry_at: None,
                    handle,
                })
            },
        )?;

        info!(%local_addr, "server listening");
        Ok(Self {
            event_loop,
            local_addr,
            connection_count,
        })
    }

    /// Accepts and serves connections on the calling thread until
    /// [`stop()`](TcpServer::stop).
    pub fn run(&self) -> Result<()> {
        self.event_loop.run()
    }

    /// Closes the acceptor, stops every connection and unblocks `run()`.
    /// Idempotent.
    pub fn stop(&self) {
        self.event_loop.stop();
    }

    /// Queues a copy of `bytes` on every live connection.
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.event_loop.post(ServerCommand::Broadcast(bytes));
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            handle: self.event_loop.handle(),
            connection_count: Arc::clone(&self.connection_count),
        }
    }
}

/// Cloneable cross-thread control of a [`TcpServer`] that does not borrow the
/// server itself.
#[derive(Clone)]
pub struct ServerHandle {
    handle: LoopHandle<ServerCommand>,
    connection_count: Arc<AtomicUsize>,
}

impl ServerHandle {
    /// Same as [`TcpServer::write`].
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.handle.post(ServerCommand::Broadcast(bytes));
        }
    }

    pub fn write_to(&self, id: ConnectionId, bytes: impl Into<Vec<u8>>) {
        ConnectionRef {
            id,
            handle: self.handle.clone(),
        }
        .write(bytes);
    }

    pub fn close(&self, id: ConnectionId) {
        self.handle.post(ServerCommand::Close(id));
    }

    pub fn stop(&self) {
        self.handle.shutdown();
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }
}
