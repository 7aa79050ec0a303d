use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dns_lookup::{getaddrinfo, AddrInfoHints, SockType};
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use tracing::{debug, info, trace, warn};

use super::channel::TcpChannel;
use super::config::TcpClientConfig;
use super::connection::Connection;
use super::reconnect::Backoff;
use super::traits::{ClientHandler, ConnectionId};
use crate::error::{NetworkError, Result};
use crate::handler::EventHandler;
use crate::object_pool::ObjectPool;
use crate::reactor::LoopHandle;
use crate::thread_pool::ThreadPool;
use crate::EventLoop;

// Token 0 is the waker; every connect attempt takes the next id as its token.
const FIRST_CONNECTION_ID: u64 = 1;

/// Requests posted to a client loop, from callers or from the resolver.
pub(crate) enum ClientCommand {
    Write(Vec<u8>),
    Resolved {
        generation: u64,
        result: io::Result<Vec<SocketAddr>>,
    },
}

enum ClientState {
    /// Waiting for the retry deadline.
    Idle,
    Resolving,
    Connecting {
        stream: TcpStream,
        addr: SocketAddr,
        id: ConnectionId,
        remaining: VecDeque<SocketAddr>,
    },
    Connected(Connection),
    Stopped,
}

/// Blocking name lookup run on the resolver pool.
pub(crate) type Resolver = fn(&str, &str) -> io::Result<Vec<SocketAddr>>;

/// Resolves `host` and `service` to candidate stream endpoints. `service` is a
/// port number or a name from the services database, e.g. `"http"`.
fn resolve(host: &str, service: &str) -> io::Result<Vec<SocketAddr>> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok((host, port).to_socket_addrs()?.collect());
    }

    let hints = AddrInfoHints {
        socktype: SockType::Stream.into(),
        ..AddrInfoHints::default()
    };
    let mut addrs = Vec::new();
    for info in getaddrinfo(Some(host), Some(service), Some(hints)).map_err(io::Error::from)? {
        let addr = info?.sockaddr;
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    Ok(addrs)
}

/// Loop-side state machine of a [`TcpClient`]:
/// resolve → connect to each candidate → read, and back on any failure.
pub(crate) struct ClientCore<H: ClientHandler> {
    config: TcpClientConfig,
    target: String,
    handler: H,
    state: ClientState,
    backoff: Backoff,
    retry_at: Option<Instant>,
    // bumped on every new sequence and on stop; stale resolutions are ignored
    generation: u64,
    next_id: u64,
    resolve: Resolver,
    // detached: a lookup stuck in getaddrinfo must not hold up `run()` returning
    resolver: ThreadPool,
    buffers: ObjectPool,
    handle: LoopHandle<ClientCommand>,
    connected: Arc<AtomicBool>,
}

impl<H: ClientHandler> ClientCore<H> {
    /// Drops whatever channel is open and starts resolving again.
    fn connect_sequence(&mut self, registry: &Registry) {
        if matches!(self.state, ClientState::Stopped) {
            return;
        }
        self.teardown(registry);
        self.retry_at = None;
        self.generation += 1;
        self.state = ClientState::Resolving;

        let generation = self.generation;
        let host = self.config.host.clone();
        let service = self.config.service.clone();
        let handle = self.handle.clone();
        let resolve = self.resolve;
        debug!(remote = %self.target, generation, "resolving");

        let submitted = self.resolver.exec(move || {
            let result = resolve(&host, &service);
            handle.post(ClientCommand::Resolved { generation, result });
        });
        if let Err(e) = submitted {
            self.fail(e);
        }
    }

    fn on_resolved(
        &mut self,
        registry: &Registry,
        generation: u64,
        result: io::Result<Vec<SocketAddr>>,
    ) {
        if generation != self.generation || !matches!(self.state, ClientState::Resolving) {
            trace!(generation, "ignoring stale resolution");
            return;
        }
        match result {
            Ok(addrs) if addrs.is_empty() => self.fail(NetworkError::NoAddresses(self.target.clone())),
            Ok(addrs) => {
                debug!(remote = %self.target, candidates = addrs.len(), "resolved");
                self.try_connect(registry, addrs.into(), None);
            }
            Err(source) => self.fail(NetworkError::Resolve {
                target: self.target.clone(),
                source,
            }),
        }
    }

    /// Starts a non-blocking connect to the first candidate that accepts one.
    fn try_connect(
        &mut self,
        registry: &Registry,
        mut remaining: VecDeque<SocketAddr>,
        mut last_error: Option<NetworkError>,
    ) {
        while let Some(addr) = remaining.pop_front() {
            let id = ConnectionId::new(self.next_id);
            self.next_id += 1;

            let attempt = TcpStream::connect(addr).and_then(|mut stream| {
                registry
                    .register(&mut stream, Token(id.as_u64() as usize), Interest::WRITABLE)
                    .map(|()| stream)
            });
            match attempt {
                Ok(stream) => {
                    trace!(%addr, conn_id = %id, "connecting");
                    self.state = ClientState::Connecting {
                        stream,
                        addr,
                        id,
                        remaining,
                    };
                    return;
                }
                Err(source) => {
                    debug!(%addr, error = %source, "connect failed");
                    last_error = Some(NetworkError::Connect { addr, source });
                }
            }
        }
        let error =
            last_error.unwrap_or_else(|| NetworkError::NoAddresses(self.target.clone()));
        self.fail(error);
    }

    /// Completes or abandons the outstanding connect once the socket reports
    /// writability.
    fn on_connect_ready(&mut self, registry: &Registry) {
        if !matches!(self.state, ClientState::Connecting { .. }) {
            return;
        }
        let ClientState::Connecting {
            mut stream,
            addr,
            id,
            remaining,
        } = mem::replace(&mut self.state, ClientState::Idle)
        else {
            return;
        };

        let failure = match stream.take_error() {
            Ok(Some(e)) | Err(e) => Some(e),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => None,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                    // Spurious wakeup, the handshake is still running.
                    self.state = ClientState::Connecting {
                        stream,
                        addr,
                        id,
                        remaining,
                    };
                    return;
                }
                Err(e) => Some(e),
            },
        };

        let _ = registry.deregister(&mut stream);
        match failure {
            Some(source) => {
                debug!(%addr, error = %source, "connect failed");
                drop(stream);
                self.try_connect(registry, remaining, Some(NetworkError::Connect { addr, source }));
            }
            None => self.established(registry, stream, addr, id),
        }
    }

    fn established(&mut self, registry: &Registry, stream: TcpStream, addr: SocketAddr, id: ConnectionId) {
        if let Err(e) = stream.set_nodelay(self.config.no_delay) {
            warn!(%addr, error = %e, "failed to set TCP_NODELAY");
        }

        let mut connection = Connection::new(id, TcpChannel::new(stream), self.buffers.acquire());
        if let Err(e) = connection.start(registry) {
            connection.stop(registry);
            self.fail(e);
            return;
        }

        info!(conn_id = %id, %addr, "connected");
        self.backoff.reset();
        self.state = ClientState::Connected(connection);
        self.connected.store(true, Ordering::SeqCst);
        self.handler.on_connect(id);
    }

    fn handle_connection_event(&mut self, registry: &Registry, event: &Event) {
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            let Self { state, handler, .. } = &mut *self;
            let result = match state {
                ClientState::Connected(connection) => {
                    connection.on_readable(registry, |data| handler.on_data(data))
                }
                _ => return,
            };
            if let Err(e) = result {
                self.lost(registry, e);
                return;
            }
        }

        if event.is_writable() {
            let result = match &mut self.state {
                ClientState::Connected(connection) => connection.on_writable(registry),
                _ => return,
            };
            if let Err(e) = result {
                self.lost(registry, e);
            }
        }
    }

    fn write(&mut self, registry: &Registry, bytes: Vec<u8>) {
        let result = match &mut self.state {
            ClientState::Connected(connection)
                if connection.is_open() && connection.peer_addr().is_some() =>
            {
                connection.write(registry, bytes)
            }
            _ => {
                trace!(len = bytes.len(), "not connected, write dropped");
                return;
            }
        };
        if let Err(e) = result {
            self.lost(registry, e);
        }
    }

    /// An established connection failed: close it and start over right away.
    fn lost(&mut self, registry: &Registry, error: NetworkError) {
        if error.is_cancellation() {
            return;
        }
        if matches!(error, NetworkError::PeerClosed) {
            info!(remote = %self.target, "server closed connection");
        } else {
            warn!(remote = %self.target, error = %error, "connection lost");
            self.handler.on_error(&error);
        }
        self.connect_sequence(registry);
    }

    /// A resolve or connect attempt failed: wait out the backoff, then retry.
    fn fail(&mut self, error: NetworkError) {
        let delay = self.backoff.next_delay();
        warn!(
            remote = %self.target,
            error = %error,
            attempt = self.backoff.failure_count(),
            retry_in_ms = delay.as_millis() as u64,
            "connect sequence failed"
        );
        self.handler.on_error(&error);
        self.state = ClientState::Idle;
        self.retry_at = Some(Instant::now() + delay);
    }

    /// Releases the current channel, if any, leaving the state `Idle`.
    fn teardown(&mut self, registry: &Registry) {
        match mem::replace(&mut self.state, ClientState::Idle) {
            ClientState::Connected(mut connection) => {
                connection.stop(registry);
                self.connected.store(false, Ordering::SeqCst);
                self.handler.on_disconnect(connection.id());
            }
            ClientState::Connecting { mut stream, .. } => {
                let _ = registry.deregister(&mut stream);
            }
            ClientState::Stopped => self.state = ClientState::Stopped,
            ClientState::Idle | ClientState::Resolving => {}
        }
    }

    fn current_token(&self) -> Option<Token> {
        match &self.state {
            ClientState::Connecting { id, .. } => Some(Token(id.as_u64() as usize)),
            ClientState::Connected(connection) => Some(connection.token()),
            _ => None,
        }
    }
}

impl<H: ClientHandler> EventHandler for ClientCore<H> {
    type Command = ClientCommand;

    fn handle_event(&mut self, registry: &Registry, event: &Event) {
        // Events for channels already abandoned are ignored.
        if self.current_token() != Some(event.token()) {
            return;
        }
        match self.state {
            ClientState::Connecting { .. } => self.on_connect_ready(registry),
            ClientState::Connected(_) => self.handle_connection_event(registry, event),
            _ => {}
        }
    }

    fn handle_command(&mut self, registry: &Registry, command: ClientCommand) {
        match command {
            ClientCommand::Write(bytes) => self.write(registry, bytes),
            ClientCommand::Resolved { generation, result } => {
                self.on_resolved(registry, generation, result)
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ClientState::Idle => self.retry_at,
            _ => None,
        }
    }

    fn handle_timeout(&mut self, registry: &Registry, now: Instant) {
        if matches!(self.retry_at, Some(at) if at <= now) {
            self.connect_sequence(registry);
        }
    }

    fn shutdown(&mut self, registry: &Registry) {
        self.generation += 1;
        self.retry_at = None;
        self.teardown(registry);
        self.state = ClientState::Stopped;
        info!(remote = %self.target, "client stopped");
    }
}

/// A TCP client that keeps one connection to `host:service` alive.
///
/// Resolution starts at construction; the connection is established and read
/// once [`run()`](TcpClient::run) drives the loop. Any failure other than a
/// deliberate [`stop()`](TcpClient::stop) starts the resolve → connect
/// sequence again, with failed sequences spaced by the configured
/// [`ReconnectPolicy`](super::ReconnectPolicy).
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::thread;
/// use mill_tcp::TcpClient;
///
/// let client = Arc::new(TcpClient::new("localhost", "8080", |data: &[u8]| {
///     println!("received {} bytes", data.len());
/// })?);
/// let runner = {
///     let client = Arc::clone(&client);
///     thread::spawn(move || client.run())
/// };
///
/// client.write(b"hello".to_vec());
/// client.stop();
/// runner.join().unwrap()?;
/// # Ok::<(), mill_tcp::NetworkError>(())
/// ```
pub struct TcpClient<H: ClientHandler> {
    event_loop: EventLoop<ClientCore<H>>,
    connected: Arc<AtomicBool>,
}

impl<H: ClientHandler> TcpClient<H> {
    pub fn new(host: impl Into<String>, service: impl Into<String>, handler: H) -> Result<Self> {
        Self::with_config(TcpClientConfig::new(host, service), handler)
    }

    pub fn with_config(config: TcpClientConfig, handler: H) -> Result<Self> {
        Self::with_resolver(config, handler, resolve)
    }

    pub(crate) fn with_resolver(config: TcpClientConfig, handler: H, resolve: Resolver) -> Result<Self> {
        if config.buffer_size == 0 {
            return Err(NetworkError::Configuration(
                "buffer_size must be non-zero".into(),
            ));
        }
        if config.host.is_empty() {
            return Err(NetworkError::Configuration("host must not be empty".into()));
        }

        let target = config.target();
        let resolver = ThreadPool::detached("mill-resolver", config.resolver_threads)?;
        let buffers = ObjectPool::new(config.buffer_size, 1);
        let backoff = Backoff::new(config.reconnect);
        let connected = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&connected);

        let event_loop = EventLoop::<ClientCore<H>>::with_capacity(
            config.events_capacity,
            config.poll_timeout,
            move |registry, handle| {
                let mut core = ClientCore {
                    config,
                    target,
                    handler,
                    state: ClientState::Idle,
                    backoff,
                    retry_at: None,
                    generation: 0,
                    next_id: FIRST_CONNECTION_ID,
                    resolve,
                    resolver,
                    buffers,
                    handle,
                    connected: shared,
                };
                core.connect_sequence(registry);
                Ok(core)
            },
        )?;

        Ok(Self {
            event_loop,
            connected,
        })
    }

    /// Connects, reads and reconnects on the calling thread until
    /// [`stop()`](TcpClient::stop).
    pub fn run(&self) -> Result<()> {
        self.event_loop.run()
    }

    /// Cancels any outstanding resolve, closes the connection and unblocks
    /// `run()`. Idempotent.
    pub fn stop(&self) {
        self.event_loop.stop();
    }

    /// Queues `bytes` on the connection. Dropped while not connected.
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.event_loop.post(ClientCommand::Write(bytes));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            handle: self.event_loop.handle(),
            connected: Arc::clone(&self.connected),
        }
    }
}

/// Cloneable cross-thread control of a [`TcpClient`].
#[derive(Clone)]
pub struct ClientHandle {
    handle: LoopHandle<ClientCommand>,
    connected: Arc<AtomicBool>,
}

impl ClientHandle {
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.handle.post(ClientCommand::Write(bytes));
        }
    }

    pub fn stop(&self) {
        self.handle.shutdown();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp::ReconnectPolicy;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_resolve_numeric_service() {
        let addrs = resolve("127.0.0.1", "8080").unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_named_service() {
        // "http" is listed in /etc/services
        let addrs = resolve("127.0.0.1", "http").unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:80".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_unknown_service_fails() {
        assert!(resolve("127.0.0.1", "no-such-service").is_err());
    }

    #[test]
    fn test_slow_resolve_does_not_delay_run_after_stop() {
        fn stuck(_host: &str, _service: &str) -> io::Result<Vec<SocketAddr>> {
            thread::sleep(Duration::from_secs(3));
            Ok(Vec::new())
        }

        let config = TcpClientConfig::new("127.0.0.1", "80");
        let client = Arc::new(TcpClient::with_resolver(config, |_: &[u8]| {}, stuck).unwrap());
        let runner = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.run())
        };
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        client.stop();
        runner.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let result = TcpClient::new("", "80", |_: &[u8]| {});
        assert!(matches!(result, Err(NetworkError::Configuration(_))));
    }

    #[test]
    fn test_unresolvable_target_keeps_retrying_until_stopped() {
        let errors = Arc::new(Mutex::new(0usize));

        struct Counting(Arc<Mutex<usize>>);
        impl ClientHandler for Counting {
            fn on_data(&mut self, _data: &[u8]) {}
            fn on_error(&mut self, _error: &NetworkError) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let config = TcpClientConfig::builder("127.0.0.1", "no-such-service")
            .reconnect(ReconnectPolicy::new(
                Duration::from_millis(5),
                Duration::from_millis(20),
            ))
            .build();
        let client = Arc::new(TcpClient::with_config(config, Counting(Arc::clone(&errors))).unwrap());
        let runner = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.run())
        };

        let start = Instant::now();
        while *errors.lock().unwrap() < 3 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(*errors.lock().unwrap() >= 3);
        assert!(!client.is_connected());

        client.stop();
        runner.join().unwrap().unwrap();
    }
}
