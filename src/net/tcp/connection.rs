use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use mio::{Interest, Registry, Token};
use tracing::{debug, trace};

use super::channel::{ByteChannel, TcpChannel};
use super::traits::ConnectionId;
use crate::error::{NetworkError, Result};
use crate::object_pool::PooledBuffer;

/// Reads performed for one readiness event before yielding to other sources.
pub const MAX_READS_PER_EVENT: usize = 32;

/// Lifecycle of a [`Connection`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Read/write lifecycle around one [`ByteChannel`].
///
/// The connection keeps one read loop and one write-queue drain loop alive for
/// its channel. Outbound buffers are written strictly in FIFO order and only
/// the head of the queue is ever handed to the channel, so at most one write
/// is in flight at any time. Errors are returned to the owner, which decides
/// whether to retire the connection (server) or reconnect (client); errors
/// observed after [`stop`](Connection::stop) are reported as
/// [`NetworkError::Cancelled`].
///
/// All methods must be called from the owning event-loop thread.
pub struct Connection<C: ByteChannel = TcpChannel> {
    id: ConnectionId,
    channel: C,
    state: ConnectionState,
    read_buffer: PooledBuffer,
    write_queue: VecDeque<Vec<u8>>,
    // bytes of the queue head already accepted by the channel
    head_written: usize,
    interest: Option<Interest>,
    peer_addr: Option<SocketAddr>,
}

impl<C: ByteChannel> Connection<C> {
    pub fn new(id: ConnectionId, channel: C, read_buffer: PooledBuffer) -> Self {
        let peer_addr = channel.peer_addr().ok();
        Self {
            id,
            channel,
            state: ConnectionState::Open,
            read_buffer,
            write_queue: VecDeque::new(),
            head_written: 0,
            interest: None,
            peer_addr,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Poll token of this connection; equal to its id.
    pub fn token(&self) -> Token {
        Token(self.id.as_u64() as usize)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.channel.is_open()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Number of buffers waiting in the outbound queue, including a partially
    /// written head.
    pub fn queued(&self) -> usize {
        self.write_queue.len()
    }

    /// Registers the channel for readability, which starts the read loop.
    pub fn start(&mut self, registry: &Registry) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(NetworkError::Cancelled);
        }
        let token = self.token();
        self.channel
            .register(registry, token, Interest::READABLE)?;
        self.interest = Some(Interest::READABLE);
        trace!(conn_id = %self.id, "connection started");
        Ok(())
    }

    /// Appends `bytes` to the outbound queue.
    ///
    /// Empty buffers and writes after [`stop`](Connection::stop) are ignored.
    /// When the queue was idle the write loop starts immediately; otherwise
    /// the running loop picks the buffer up after the ones before it.
    pub fn write(&mut self, registry: &Registry, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() || self.state != ConnectionState::Open {
            return Ok(());
        }
        let idle = self.write_queue.is_empty();
        self.write_queue.push_back(bytes);
        if idle {
            self.flush(registry)
        } else {
            Ok(())
        }
    }

    /// Read loop body: reads until the channel would block, handing every
    /// chunk to `deliver`.
    ///
    /// After [`MAX_READS_PER_EVENT`] reads the channel is re-armed and the
    /// loop returns; the remaining data is picked up on the next poll.
    pub fn on_readable<F>(&mut self, registry: &Registry, mut deliver: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut reads = 0;
        loop {
            if self.state != ConnectionState::Open {
                return Err(NetworkError::Cancelled);
            }
            if reads == MAX_READS_PER_EVENT {
                return self.rearm(registry);
            }
            match self.channel.read_some(&mut self.read_buffer[..]) {
                Ok(0) => return Err(self.classify(NetworkError::PeerClosed)),
                Ok(n) => {
                    reads += 1;
                    trace!(conn_id = %self.id, len = n, "read");
                    deliver(&self.read_buffer[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.classify(e.into())),
            }
        }
    }

    /// Write loop body, resumed when the channel reports writability.
    pub fn on_writable(&mut self, registry: &Registry) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(NetworkError::Cancelled);
        }
        self.flush(registry)
    }

    /// Closes the channel gracefully and discards queued writes. Idempotent.
    pub fn stop(&mut self, registry: &Registry) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.state = ConnectionState::Closing;

        if self.interest.take().is_some() {
            let _ = self.channel.deregister(registry);
        }
        self.channel.close();

        let discarded = self.write_queue.len();
        self.write_queue.clear();
        self.head_written = 0;
        self.state = ConnectionState::Closed;
        debug!(conn_id = %self.id, discarded, "connection stopped");
    }

    fn flush(&mut self, registry: &Registry) -> Result<()> {
        while let Some(head) = self.write_queue.front() {
            let len = head.len();
            match self.channel.write_some(&head[self.head_written..]) {
                Ok(0) => {
                    return Err(self.classify(io::Error::from(io::ErrorKind::WriteZero).into()))
                }
                Ok(n) => {
                    self.head_written += n;
                    if self.head_written == len {
                        self.write_queue.pop_front();
                        self.head_written = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return self.set_interest(registry, Interest::READABLE | Interest::WRITABLE);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.classify(e.into())),
            }
        }
        self.set_interest(registry, Interest::READABLE)
    }

    /// Re-registers with the current interest so that readiness still
    /// pending on the socket raises a fresh event.
    fn rearm(&mut self, registry: &Registry) -> Result<()> {
        if let Some(interest) = self.interest {
            let token = self.token();
            self.channel.reregister(registry, token, interest)?;
        }
        trace!(conn_id = %self.id, "read budget spent, re-armed");
        Ok(())
    }

    fn set_interest(&mut self, registry: &Registry, interest: Interest) -> Result<()> {
        match self.interest {
            Some(current) if current != interest => {
                let token = self.token();
                self.channel.reregister(registry, token, interest)?;
                self.interest = Some(interest);
            }
            _ => {}
        }
        Ok(())
    }

    fn classify(&self, error: NetworkError) -> NetworkError {
        if self.state == ConnectionState::Open {
            error
        } else {
            NetworkError::Cancelled
        }
    }
}
