use std::fmt;

use super::server::ConnectionRef;
use crate::error::NetworkError;

/// Unique identifier for connections.
///
/// Each TCP connection is assigned a ConnectionId when it is accepted or
/// established. The ID stays constant for the connection's lifetime and is
/// never reused by the same server or client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Application callbacks for a [`TcpServer`](super::TcpServer).
///
/// All methods run on the server's event-loop thread, one at a time. Only
/// `on_data` is required; closures `FnMut(&[u8], &ConnectionRef)` implement
/// this trait directly.
///
/// ## Execution Context
///
/// Handlers must not block: while one runs, no other connection of the same
/// server makes progress. Writes issued through the [`ConnectionRef`] are
/// queued and flushed after the handler returns.
pub trait ServerHandler: Send + 'static {
    /// Called once per successful read with exactly the bytes received.
    fn on_data(&mut self, conn: &ConnectionRef, data: &[u8]);

    /// Called after an accepted connection joined the registry.
    fn on_connect(&mut self, conn: &ConnectionRef) {
        let _ = conn;
    }

    /// Called after a connection left the registry, whether it was retired
    /// because of an error or closed deliberately.
    fn on_disconnect(&mut self, conn_id: ConnectionId) {
        let _ = conn_id;
    }

    /// Called for transport errors; `conn_id` is `None` for accept errors.
    fn on_error(&mut self, conn_id: Option<ConnectionId>, error: &NetworkError) {
        let _ = (conn_id, error);
    }
}

impl<F> ServerHandler for F
where
    F: FnMut(&[u8], &ConnectionRef) + Send + 'static,
{
    fn on_data(&mut self, conn: &ConnectionRef, data: &[u8]) {
        self(data, conn)
    }
}

/// Application callbacks for a [`TcpClient`](super::TcpClient).
///
/// Runs on the client's event-loop thread. Closures `FnMut(&[u8])` implement
/// this trait directly.
pub trait ClientHandler: Send + 'static {
    /// Called once per successful read with exactly the bytes received.
    fn on_data(&mut self, data: &[u8]);

    /// Called each time a connection to the remote endpoint is established.
    fn on_connect(&mut self, conn_id: ConnectionId) {
        let _ = conn_id;
    }

    /// Called when an established connection is lost or closed.
    fn on_disconnect(&mut self, conn_id: ConnectionId) {
        let _ = conn_id;
    }

    /// Called for resolve, connect and transport errors before a retry.
    fn on_error(&mut self, error: &NetworkError) {
        let _ = error;
    }
}

impl<F> ClientHandler for F
where
    F: FnMut(&[u8]) + Send + 'static,
{
    fn on_data(&mut self, data: &[u8]) {
        self(data)
    }
}
