//! Single-flight FIFO execution of asynchronous work.
//!
//! Any thread may hand work to a [`CommandQueue`]; one worker task runs it strictly
//! one item at a time in the order it was accepted. A single periodic task can be
//! installed on top; each firing is appended to the same backlog, so it queues up
//! behind whatever was submitted before it.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

pub type Task = BoxFuture<'static, ()>;

type TaskFactory = Box<dyn Fn() -> Task + Send + Sync>;

struct Periodic {
    factory: TaskFactory,
    period: Duration,
}

#[derive(Default)]
struct Backlog {
    tasks: VecDeque<Task>,
    closed: bool,
    periodic: Option<Periodic>,
    periodic_scheduled: bool,
}

#[derive(Default)]
struct Shared {
    backlog: Mutex<Backlog>,
    wake: Notify,
}

impl Shared {
    // Tasks never run under this lock, so a poisoned guard still holds a consistent backlog.
    fn lock(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        let mut backlog = self.lock();
        backlog.closed = true;
        backlog.periodic = None;
        drop(backlog);
        self.wake.notify_one();
    }
}

pub struct CommandQueue {
    shared: Arc<Shared>,
    runtime: Handle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Starts a queue whose worker runs on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        let shared = Arc::new(Shared::default());
        let worker = runtime.spawn(run(Arc::clone(&shared)));
        Self {
            shared,
            runtime,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Appends `task` to the backlog without waiting for it to run.
    ///
    /// Once the queue is closed the task is dropped unrun and [`Error::QueueClosed`]
    /// is returned.
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut backlog = self.shared.lock();
        if backlog.closed {
            drop(backlog);
            warn!("dropping task submitted to a closed command queue");
            return Err(Error::QueueClosed);
        }
        backlog.tasks.push_back(task.boxed());
        drop(backlog);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Installs the periodic task, replacing any previous one.
    ///
    /// `factory` runs once per `period`, under the queue lock, and the future it
    /// returns is enqueued like any other task. It must not call back into the queue.
    /// Re-installing while a timer is already armed only swaps the factory and period.
    pub fn set_periodic<F, Fut>(&self, factory: F, period: Duration) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut backlog = self.shared.lock();
        if backlog.closed {
            return Err(Error::QueueClosed);
        }
        backlog.periodic = Some(Periodic {
            factory: Box::new(move || factory().boxed()),
            period,
        });
        let armed = std::mem::replace(&mut backlog.periodic_scheduled, true);
        drop(backlog);

        if !armed {
            debug!(?period, "arming periodic task");
            self.runtime.spawn(rearm(Arc::clone(&self.shared), period));
        }
        Ok(())
    }

    /// Stops future firings. An instance already in the backlog still runs.
    pub fn cancel_periodic(&self) {
        self.shared.lock().periodic = None;
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Closes the queue and waits until the worker has run the remaining backlog.
    ///
    /// Later calls return immediately.
    pub async fn close(&self) {
        self.shared.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("command queue worker ended abnormally: {e}");
            }
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // lets a detached worker drain and exit
        self.shared.close();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut backlog = shared.lock();
            match backlog.tasks.pop_front() {
                Some(task) => Some(task),
                None if backlog.closed => break,
                None => None,
            }
        };

        match next {
            Some(task) => {
                if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                    error!("queued task panicked");
                }
            }
            None => shared.wake.notified().await,
        }
    }
    debug!("command queue worker stopped");
}

async fn rearm(shared: Arc<Shared>, mut period: Duration) {
    loop {
        tokio::time::sleep(period).await;

        {
            let mut guard = shared.lock();
            let backlog = &mut *guard;
            match &backlog.periodic {
                Some(periodic) if !backlog.closed => {
                    period = periodic.period;
                    backlog.tasks.push_back((periodic.factory)());
                }
                _ => {
                    backlog.periodic_scheduled = false;
                    break;
                }
            }
        }
        shared.wake.notify_one();
    }
    debug!("periodic task disarmed");
}
