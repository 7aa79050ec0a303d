use std::time::Instant;

use mio::{event::Event, Registry};

/// Loop-side state machine driven by a [`Reactor`](crate::reactor::Reactor).
///
/// Every method runs on the thread that called `run()`, one at a time, so an
/// implementation owns its sockets and queues without any locking. Other
/// threads talk to it only by posting [`Command`](EventHandler::Command)s.
pub trait EventHandler: Send + 'static {
    /// Request posted from another thread through a [`LoopHandle`](crate::LoopHandle).
    type Command: Send + 'static;

    /// Called for every readiness event whose token is not the waker's.
    fn handle_event(&mut self, registry: &Registry, event: &Event);

    /// Called for every posted command, in posting order.
    fn handle_command(&mut self, registry: &Registry, command: Self::Command);

    /// Earliest instant at which [`handle_timeout`](EventHandler::handle_timeout)
    /// wants to run, if any.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn handle_timeout(&mut self, registry: &Registry, now: Instant) {
        let _ = (registry, now);
    }

    /// Called once on the loop thread when the loop is asked to stop.
    fn shutdown(&mut self, registry: &Registry);
}
