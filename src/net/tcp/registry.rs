use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mio::Registry;
use tracing::debug;

use super::channel::{ByteChannel, TcpChannel};
use super::connection::Connection;
use super::traits::ConnectionId;
use crate::error::{NetworkError, Result};

/// Live connections of a server, owned by id.
///
/// Lives on the event-loop thread, so membership changes need no locking.
/// The only state visible to other threads is the member count, published
/// through an atomic for [`TcpServer::connection_count`](super::TcpServer::connection_count).
pub struct ConnectionRegistry<C: ByteChannel = TcpChannel> {
    connections: HashMap<ConnectionId, Connection<C>>,
    count: Arc<AtomicUsize>,
}

impl<C: ByteChannel> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self::with_counter(Arc::new(AtomicUsize::new(0)))
    }

    pub fn with_counter(count: Arc<AtomicUsize>) -> Self {
        count.store(0, Ordering::SeqCst);
        Self {
            connections: HashMap::new(),
            count,
        }
    }

    /// Inserts `connection` and starts it. A connection that fails to start
    /// is stopped and dropped again.
    pub fn add(&mut self, registry: &Registry, connection: Connection<C>) -> Result<()> {
        let id = connection.id();
        self.connections.insert(id, connection);
        self.publish();

        let started = match self.connections.get_mut(&id) {
            Some(connection) => connection.start(registry),
            None => Ok(()),
        };
        if let Err(e) = started {
            self.remove(registry, id);
            return Err(e);
        }
        Ok(())
    }

    /// Stops and erases the connection. Returns `false` if it was not a
    /// member, which makes double removal harmless.
    pub fn remove(&mut self, registry: &Registry, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(mut connection) => {
                connection.stop(registry);
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Stops every member and clears the set. Returns the ids that were live.
    pub fn remove_all(&mut self, registry: &Registry) -> Vec<ConnectionId> {
        let mut ids = Vec::with_capacity(self.connections.len());
        for (id, mut connection) in self.connections.drain() {
            connection.stop(registry);
            ids.push(id);
        }
        self.publish();
        debug!(count = ids.len(), "stopped all connections");
        ids
    }

    /// Queues `bytes` on one member.
    pub fn write_to(&mut self, registry: &Registry, id: ConnectionId, bytes: Vec<u8>) -> Result<()> {
        match self.connections.get_mut(&id) {
            Some(connection) => connection.write(registry, bytes),
            None => Ok(()),
        }
    }

    /// Queues a copy of `bytes` on every member and returns the members whose
    /// write failed so the owner can retire them.
    pub fn broadcast(
        &mut self,
        registry: &Registry,
        bytes: &[u8],
    ) -> Vec<(ConnectionId, NetworkError)> {
        let mut failed = Vec::new();
        if bytes.is_empty() {
            return failed;
        }
        for (id, connection) in self.connections.iter_mut() {
            if let Err(e) = connection.write(registry, bytes.to_vec()) {
                failed.push((*id, e));
            }
        }
        failed
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<C>> {
        self.connections.get_mut(&id)
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn publish(&self) {
        self.count.store(self.connections.len(), Ordering::SeqCst);
    }
}

impl<C: ByteChannel> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::net::tcp::channel::mock::{MockChannel, Wire};
    use crate::object_pool::ObjectPool;
    use mio::Poll;

    fn add_connections(
        registry: &mut ConnectionRegistry<MockChannel>,
        poll: &Poll,
        n: u64,
    ) -> Vec<Arc<Mutex<Wire>>> {
        let pool = ObjectPool::new(32, 8);
        (0..n)
            .map(|i| {
                let (channel, wire) = MockChannel::new();
                let conn = Connection::new(ConnectionId(i + 2), channel, pool.acquire());
                registry.add(poll.registry(), conn).unwrap();
                wire
            })
            .collect()
    }

    #[test]
    fn test_add_starts_connection() {
        let poll = Poll::new().unwrap();
        let mut registry = ConnectionRegistry::new();
        let wires = add_connections(&mut registry, &poll, 1);

        assert_eq!(registry.size(), 1);
        assert!(wires[0].lock().unwrap().registered);
    }

    #[test]
    fn test_count_after_retirements() {
        let poll = Poll::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ConnectionRegistry::with_counter(Arc::clone(&counter));
        add_connections(&mut registry, &poll, 5);

        assert!(registry.remove(poll.registry(), ConnectionId(2)));
        assert!(registry.remove(poll.registry(), ConnectionId(4)));

        assert_eq!(registry.size(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_double_remove_is_harmless() {
        let poll = Poll::new().unwrap();
        let mut registry = ConnectionRegistry::new();
        let wires = add_connections(&mut registry, &poll, 2);

        assert!(registry.remove(poll.registry(), ConnectionId(2)));
        assert!(!registry.remove(poll.registry(), ConnectionId(2)));

        assert_eq!(registry.size(), 1);
        assert_eq!(wires[0].lock().unwrap().closed, 1);
    }

    #[test]
    fn test_broadcast_reaches_every_member_once() {
        let poll = Poll::new().unwrap();
        let mut registry = ConnectionRegistry::new();
        let wires = add_connections(&mut registry, &poll, 3);

        let failed = registry.broadcast(poll.registry(), b"tick");
        assert!(failed.is_empty());

        for wire in &wires {
            assert_eq!(wire.lock().unwrap().written, b"tick");
        }
    }

    #[test]
    fn test_broadcast_reports_failed_members() {
        let poll = Poll::new().unwrap();
        let mut registry = ConnectionRegistry::new();
        add_connections(&mut registry, &poll, 1);

        let pool = ObjectPool::new(32, 1);
        let (channel, _wire) = MockChannel::new();
        let broken = Connection::new(
            ConnectionId(99),
            channel.failing_writes(std::io::ErrorKind::BrokenPipe),
            pool.acquire(),
        );
        registry.add(poll.registry(), broken).unwrap();

        let failed = registry.broadcast(poll.registry(), b"x");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, ConnectionId(99));
    }

    #[test]
    fn test_remove_all_stops_everything() {
        let poll = Poll::new().unwrap();
        let mut registry = ConnectionRegistry::new();
        let wires = add_connections(&mut registry, &poll, 4);

        let mut ids = registry.remove_all(poll.registry());
        ids.sort();

        assert_eq!(ids.len(), 4);
        assert!(registry.is_empty());
        assert!(wires.iter().all(|w| w.lock().unwrap().closed == 1));
    }
}
