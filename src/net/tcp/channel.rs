//! The byte channel: one non-blocking socket as seen by a [`Connection`](super::Connection).

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::{event::Source, net::TcpStream, Interest, Registry, Token};

/// A non-blocking, readiness-driven byte stream.
///
/// `read_some`/`write_some` never block: `WouldBlock` means the operation
/// completes later, announced by a readiness event on the loop thread. The
/// channel is a [`Source`] so its owner can register it with the poller.
pub trait ByteChannel: Source + Send {
    /// Reads whatever is available into `buf`; `Ok(0)` is end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes a prefix of `buf` and returns its length.
    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Shuts down both directions and releases the socket. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// The remote endpoint; fails while the socket is not connected.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// [`ByteChannel`] over a `mio` TCP stream.
#[derive(Debug)]
pub struct TcpChannel {
    stream: Option<TcpStream>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl ByteChannel for TcpChannel {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Errors only mean the peer already went away.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.stream {
            Some(stream) => stream.peer_addr(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

impl Source for TcpChannel {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream()?.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream()?.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.deregister(registry),
            None => Ok(()),
        }
    }
}
