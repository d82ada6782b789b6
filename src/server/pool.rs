//! Fixed-size worker pool
//!
//! Workers pull boxed closures off one shared FIFO queue. The queue is
//! unbounded; callers that need back-pressure have to add it themselves.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool has been shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Running,
    /// No new tasks; workers exit once the queue is empty.
    Draining,
    /// Workers exit after their current task, the queue is abandoned.
    Stopped,
}

struct State {
    queue: VecDeque<Task>,
    mode: Mode,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers named `relay-worker-<n>`.
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool needs at least one thread",
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                mode: Mode::Running,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("relay-worker-{id}"))
                .spawn(move || worker_loop(id, worker_shared));

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Take down whatever was already started before bailing.
                    shared.state.lock().mode = Mode::Stopped;
                    shared.available.notify_all();
                    for w in workers {
                        let _ = w.join();
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(workers = size, "Worker pool started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks queued but not yet claimed by a worker.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().mode == Mode::Running
    }

    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.mode != Mode::Running {
            return Err(PoolError::ShutDown);
        }
        state.queue.push_back(Box::new(task));
        drop(state);

        self.shared.available.notify_one();
        Ok(())
    }

    /// Stops the workers without draining the queue.
    ///
    /// Tasks already running complete; queued ones are dropped. Returns how
    /// many were dropped.
    pub fn shutdown(&self) -> usize {
        let discarded = {
            let mut state = self.shared.state.lock();
            state.mode = Mode::Stopped;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        self.shared.available.notify_all();
        self.join_workers();

        if discarded > 0 {
            tracing::warn!(discarded, "Worker pool stopped with pending tasks");
        }
        discarded
    }

    /// Stops accepting tasks and returns once every queued task has run.
    pub fn shutdown_graceful(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.mode == Mode::Running {
                state.mode = Mode::Draining;
            }
        }
        self.shared.available.notify_all();
        self.join_workers();
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked outside a task");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.lock().is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                match state.mode {
                    Mode::Stopped => return,
                    Mode::Draining if state.queue.is_empty() => return,
                    _ => {}
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                shared.available.wait(&mut state);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(worker = id, "Task panicked");
        }
    }
}
