use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
};
use std::thread::{Builder, JoinHandle};

use tracing::warn;

use crate::error::{NetworkError, Result};

pub const DEFAULT_POOL_CAPACITY: usize = 1;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum WorkerMessage {
    Task(Task),
    Terminate,
}

/// Small pool of worker threads for work that would otherwise block the event
/// loop, such as host name resolution. Tasks are dispatched round-robin.
///
/// Dropping a pool built with [`new`](ThreadPool::new) waits for queued tasks;
/// a [`detached`](ThreadPool::detached) pool returns at once and lets its
/// workers finish in the background.
pub struct ThreadPool {
    workers: Vec<Worker>,
    senders: Vec<Sender<WorkerMessage>>,
    next_worker: AtomicUsize,
    join_on_drop: bool,
}

impl ThreadPool {
    pub fn new(name: &str, capacity: usize) -> Result<Self> {
        Self::build(name, capacity, true)
    }

    /// A pool whose drop never blocks on a running task.
    pub fn detached(name: &str, capacity: usize) -> Result<Self> {
        Self::build(name, capacity, false)
    }

    fn build(name: &str, capacity: usize, join_on_drop: bool) -> Result<Self> {
        let capacity = capacity.max(1);
        let mut workers = Vec::with_capacity(capacity);
        let mut senders = Vec::with_capacity(capacity);

        for id in 0..capacity {
            let (sender, receiver) = mpsc::channel::<WorkerMessage>();
            workers.push(Worker::spawn(format!("{name}-{id}"), receiver)?);
            senders.push(sender);
        }

        Ok(Self {
            workers,
            senders,
            next_worker: AtomicUsize::new(0),
            join_on_drop,
        })
    }

    pub fn exec<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index]
            .send(WorkerMessage::Task(Box::new(task)))
            .map_err(|_| NetworkError::EventLoopGone)
    }

    pub fn workers_len(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerMessage::Terminate);
        }
        if !self.join_on_drop {
            return;
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!(worker = %worker.name, "worker thread panicked");
                }
            }
        }
    }
}

struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(name: String, receiver: Receiver<WorkerMessage>) -> Result<Self> {
        let thread = Builder::new().name(name.clone()).spawn(move || {
            while let Ok(message) = receiver.recv() {
                match message {
                    WorkerMessage::Task(task) => task(),
                    WorkerMessage::Terminate => break,
                }
            }
        })?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }
}
