//! Network protocol implementations on top of the single-threaded reactor.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Application                       │
//! │  ┌──────────────┐          ┌──────────────────────────┐     │
//! │  │ TcpServer/   │────────▶│ ServerHandler /          │     │
//! │  │ TcpClient    │          │ ClientHandler callbacks  │     │
//! │  └──────────────┘          └──────────────────────────┘     │
//! └────────────┬──────────────────────┬─────────────────────────┘
//!              │ write / stop         │ on_data, on_connect, ...
//!              ▼                      │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   EventLoop (one thread)                    │
//! │  ┌──────────┐       ┌─────────────┐      ┌──────────────┐   │
//! │  │ Reactor  │─────▶│ Server/     │────▶│ Connections  │   │
//! │  │ (Poll)   │       │ client core │      │              │   │
//! │  └──────────┘       └─────────────┘      └──────────────┘   │
//! └────────────┬────────────────────────────────────────────────┘
//!              │ OS Events
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Operating System (epoll/kqueue/IOCP)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers run on the loop thread one at a time and must not block.

pub mod tcp;
