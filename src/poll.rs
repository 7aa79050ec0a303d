use std::{sync::Arc, time::Duration};

use mio::{Events, Poll, Registry, Token, Waker};

use crate::error::Result;

/// Token reserved for the loop's waker. I/O sources must never use it.
pub const WAKER_TOKEN: Token = Token(0);

/// Owns the OS poller together with the waker used to interrupt it from
/// other threads.
pub struct PollHandle {
    poller: Poll,
    waker: Arc<Waker>,
}

impl PollHandle {
    pub fn new() -> Result<Self> {
        let poller = Poll::new()?;
        let waker = Waker::new(poller.registry(), WAKER_TOKEN)?;
        Ok(PollHandle {
            poller,
            waker: Arc::new(waker),
        })
    }

    /// Registry used to (de)register sockets owned by the loop.
    pub fn registry(&self) -> &Registry {
        self.poller.registry()
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Blocks until at least one event is ready or `timeout` elapses and
    /// returns the number of events collected.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        self.poller.poll(events, timeout)?;
        Ok(events.iter().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_poll_times_out_without_events() {
        let mut poller = PollHandle::new().unwrap();
        let mut events = Events::with_capacity(16);
        let count = poller
            .poll(&mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_waker_interrupts_poll() {
        let mut poller = PollHandle::new().unwrap();
        let waker = poller.waker();
        let mut events = Events::with_capacity(16);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake().unwrap();
        });

        poller
            .poll(&mut events, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(events.iter().any(|event| event.token() == WAKER_TOKEN));
        handle.join().unwrap();
    }
}
