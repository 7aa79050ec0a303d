//! TCP server and client with per-connection ordered write queues.
//!
//! Each [`TcpServer`] and [`TcpClient`] owns one single-threaded event loop.
//! Sockets, queues and the registry live on that loop's thread; other threads
//! reach them only through posted commands.
//!
//! ```text
//! Server loop:
//!   TcpListener ──accept──> Connection ──add──> ConnectionRegistry
//!                                                 HashMap<ConnectionId, Connection>
//!                                                   ├──> #2 { channel, read buffer, write queue }
//!                                                   ├──> #3 { channel, read buffer, write queue }
//!                                                   └──> #N ...
//!
//! Client loop:
//!   resolve (worker thread) ──> connect candidates in order ──> Connection
//!        ▲                                                          │
//!        └──────────── backoff on failure, at once on loss ─────────┘
//! ```
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Open ──stop()──> Closing ──> Closed
//!   │
//!   ├─ read loop:  read until WouldBlock, hand every chunk to the handler
//!   └─ write loop: write the queue head only; pop on completion; idle when empty
//! ```
//!
//! A read or write error other than a cancellation retires the connection on a
//! server and starts the connect sequence again on a client. Errors caused by
//! `stop()` are cancellations and are never acted upon.
//!
//! ## Configuration
//!
//! ```rust
//! use mill_tcp::net::tcp::config::TcpServerConfig;
//!
//! let config = TcpServerConfig::builder()
//!     .address("0.0.0.0:8080".parse().unwrap())
//!     .buffer_size(16384)
//!     .max_connections(1000)
//!     .no_delay(true)
//!     .build();
//! ```
//!
//! ## Handler Implementation
//!
//! ```rust
//! use mill_tcp::net::tcp::{ConnectionId, ConnectionRef, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_data(&mut self, conn: &ConnectionRef, data: &[u8]) {
//!         conn.write(data);
//!     }
//!
//!     fn on_disconnect(&mut self, conn_id: ConnectionId) {
//!         tracing::info!(%conn_id, "gone");
//!     }
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod traits;

pub use channel::{ByteChannel, TcpChannel};
pub use client::{ClientHandle, TcpClient};
pub use config::{TcpClientConfig, TcpServerConfig};
pub use connection::{Connection, ConnectionState};
pub use reconnect::ReconnectPolicy;
pub use registry::ConnectionRegistry;
pub use server::{ConnectionRef, ServerHandle, TcpServer};
pub use traits::{ClientHandler, ConnectionId, ServerHandler};
