use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use super::reconnect::ReconnectPolicy;
use crate::reactor::{DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS};
use crate::thread_pool::DEFAULT_POOL_CAPACITY;

/// Size of each connection's read buffer unless configured otherwise.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Configuration for TCP server.
///
/// Controls the bind address, read buffer size, connection limit and event
/// loop tuning. Use [`TcpServerConfig::builder()`] for ergonomic construction.
///
/// ## Resource Limits
///
/// - buffer_size: Size of the read buffer every connection owns
/// - max_connections: Hard limit on concurrent connections (None for unlimited);
///   sockets accepted beyond it are closed immediately
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Address to bind to
    pub address: SocketAddr,
    /// Size of each connection's read buffer
    pub buffer_size: usize,
    /// Maximum number of connections
    pub max_connections: Option<usize>,
    /// Enable TCP_NODELAY on accepted sockets
    pub no_delay: bool,
    /// Events collected per poll
    pub events_capacity: usize,
    /// Upper bound on a single poll wait
    pub poll_timeout: Duration,
}

impl TcpServerConfig {
    /// Create a new builder for TcpServerConfig
    pub fn builder() -> TcpServerConfigBuilder {
        TcpServerConfigBuilder::new()
    }

    /// Listen on every IPv4 interface on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections: None,
            no_delay: true,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

/// Builder for TcpServerConfig.
///
/// Unset fields fall back to TcpServerConfig::default().
#[derive(Default)]
pub struct TcpServerConfigBuilder {
    address: Option<SocketAddr>,
    buffer_size: Option<usize>,
    max_connections: Option<usize>,
    no_delay: Option<bool>,
    events_capacity: Option<usize>,
    poll_timeout: Option<Duration>,
}

impl TcpServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> TcpServerConfig {
        let default = TcpServerConfig::default();
        TcpServerConfig {
            address: self.address.unwrap_or(default.address),
            buffer_size: self.buffer_size.unwrap_or(default.buffer_size),
            max_connections: self.max_connections.or(default.max_connections),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            poll_timeout: self.poll_timeout.unwrap_or(default.poll_timeout),
        }
    }
}

/// Configuration for TCP client.
///
/// `host` is a name or numeric address; `service` is a port number or a
/// service name such as `"http"`.
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    pub host: String,
    pub service: String,
    /// Size of the connection's read buffer
    pub buffer_size: usize,
    /// Enable TCP_NODELAY on the connected socket
    pub no_delay: bool,
    /// Delay schedule between failed connect sequences
    pub reconnect: ReconnectPolicy,
    /// Threads used for blocking name resolution
    pub resolver_threads: usize,
    pub events_capacity: usize,
    pub poll_timeout: Duration,
}

impl TcpClientConfig {
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            no_delay: true,
            reconnect: ReconnectPolicy::default(),
            resolver_threads: DEFAULT_POOL_CAPACITY,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }

    pub fn builder(host: impl Into<String>, service: impl Into<String>) -> TcpClientConfigBuilder {
        TcpClientConfigBuilder {
            config: Self::new(host, service),
        }
    }

    /// `host:service` as shown in logs and errors.
    pub fn target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.service)
        } else {
            format!("{}:{}", self.host, self.service)
        }
    }
}

/// Builder for TcpClientConfig.
pub struct TcpClientConfigBuilder {
    config: TcpClientConfig,
}

impl TcpClientConfigBuilder {
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.config.no_delay = enabled;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn resolver_threads(mut self, threads: usize) -> Self {
        self.config.resolver_threads = threads;
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.config.events_capacity = capacity;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn build(self) -> TcpClientConfig {
        self.config
    }
}
