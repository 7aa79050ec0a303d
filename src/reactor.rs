use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc,
    },
    time::{Duration, Instant},
};

use mio::{Events, Registry, Waker};
use tracing::{debug, trace, warn};

use crate::{
    error::{NetworkError, Result},
    handler::EventHandler,
    poll::{PollHandle, WAKER_TOKEN},
};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Cloneable, thread-safe entry point into a running loop.
///
/// Commands are queued on an `mpsc` channel and the poller is woken so the
/// loop thread picks them up on its next iteration.
pub struct LoopHandle<C> {
    sender: Sender<C>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl<C> Clone for LoopHandle<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            waker: Arc::clone(&self.waker),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<C> LoopHandle<C> {
    /// Posts `command` to the loop. Returns `false` once the loop is stopping
    /// or gone, in which case the command is dropped.
    pub fn post(&self, command: C) -> bool {
        if self.is_shutdown() {
            return false;
        }
        if self.sender.send(command).is_err() {
            return false;
        }
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
        true
    }

    /// Asks the loop to stop. Only the first call has an effect.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            let _ = self.waker.wake();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Single-threaded reactor: polls readiness, drains posted commands and
/// fires deadlines, dispatching everything to one [`EventHandler`].
pub struct Reactor<H: EventHandler> {
    poll_handle: PollHandle,
    events: Events,
    commands: Receiver<H::Command>,
    shutdown: Arc<AtomicBool>,
    handler: H,
    poll_timeout: Duration,
}

impl<H: EventHandler> Reactor<H> {
    /// Builds a reactor. `init` receives the poll registry and a handle to the
    /// loop so the handler can register its sources and hand out the handle.
    pub fn new<F>(
        events_capacity: usize,
        poll_timeout: Duration,
        init: F,
    ) -> Result<(Self, LoopHandle<H::Command>)>
    where
        F: FnOnce(&Registry, LoopHandle<H::Command>) -> Result<H>,
    {
        let poll_handle = PollHandle::new()?;
        let (sender, commands) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = LoopHandle {
            sender,
            waker: poll_handle.waker(),
            shutdown: Arc::clone(&shutdown),
        };

        let handler = init(poll_handle.registry(), handle.clone())?;

        Ok((
            Self {
                poll_handle,
                events: Events::with_capacity(events_capacity),
                commands,
                shutdown,
                handler,
                poll_timeout,
            },
            handle,
        ))
    }

    /// Runs until [`LoopHandle::shutdown`] is called, then lets the handler
    /// release its resources and discards any commands still queued.
    pub fn run(&mut self) -> Result<()> {
        debug!("event loop running");

        let result = self.run_until_shutdown();

        self.handler.shutdown(self.poll_handle.registry());
        let discarded = self.commands.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "dropped commands posted during shutdown");
        }

        debug!("event loop stopped");
        result
    }

    fn run_until_shutdown(&mut self) -> Result<()> {
        loop {
            if self.is_shutdown() {
                return Ok(());
            }

            let timeout = self.next_timeout();
            match self.poll_handle.poll(&mut self.events, Some(timeout)) {
                Ok(_) => {}
                Err(NetworkError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            self.drain_commands();

            let registry = self.poll_handle.registry();
            for event in self.events.iter() {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                trace!(token = event.token().0, "dispatching event");
                self.handler.handle_event(registry, event);
            }

            if let Some(deadline) = self.handler.next_deadline() {
                let now = Instant::now();
                if deadline <= now && !self.is_shutdown() {
                    self.handler.handle_timeout(registry, now);
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        let registry = self.poll_handle.registry();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match self.commands.try_recv() {
                Ok(command) => self.handler.handle_command(registry, command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    fn next_timeout(&self) -> Duration {
        match self.handler.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.poll_timeout),
            None => self.poll_timeout,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
