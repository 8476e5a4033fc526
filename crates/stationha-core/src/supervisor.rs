//! Task supervision.
//!
//! Pipeline work runs as named tasks on tokio with bounded concurrency. Every
//! task's result is awaited by the supervisor: errors and panics are logged
//! with the task name and counted, never propagated.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};

use crate::error::BridgeResult;

/// Default number of tasks allowed to run at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Supervisor statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStats {
    /// Tasks accepted for execution
    pub submitted: u64,
    /// Tasks that returned `Ok`
    pub completed: u64,
    /// Tasks that returned an error
    pub failed: u64,
    /// Tasks that panicked
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SupervisorStats {
        SupervisorStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
        }
    }
}

struct Job {
    name: &'static str,
    future: BoxFuture<'static, BridgeResult<()>>,
}

/// Submits tasks to a [`TaskSupervisor`]. Cheap to clone; tasks may hold one
/// to submit follow-up work.
#[derive(Clone)]
pub struct TaskSpawner {
    tx: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
}

impl TaskSpawner {
    /// Submit a task. Returns false if the supervisor has stopped.
    pub fn spawn<F>(&self, name: &'static str, future: F) -> bool
    where
        F: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        let job = Job {
            name,
            future: future.boxed(),
        };
        match self.tx.send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(_) => {
                error!(task = name, "Supervisor stopped, task dropped");
                false
            }
        }
    }
}

/// Runs submitted tasks and logs their outcome.
pub struct TaskSupervisor {
    handle: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl TaskSupervisor {
    /// Start a supervisor on the current runtime.
    ///
    /// The supervisor runs until every [`TaskSpawner`] clone is dropped and
    /// all submitted tasks, including follow-ups, have finished.
    pub fn start(max_concurrency: usize) -> (Self, TaskSpawner) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let handle = tokio::spawn(run(rx, permits, counters.clone()));
        (
            Self {
                handle,
                counters: counters.clone(),
            },
            TaskSpawner { tx, counters },
        )
    }

    pub fn stats(&self) -> SupervisorStats {
        self.counters.snapshot()
    }

    /// Wait for the supervisor to drain. Callers drop their spawners first.
    pub async fn join(self) -> SupervisorStats {
        if let Err(e) = self.handle.await {
            error!("Supervisor loop ended abnormally: {}", e);
        }
        self.counters.snapshot()
    }
}

type Outcome = (&'static str, std::thread::Result<BridgeResult<()>>);

async fn run(mut rx: mpsc::UnboundedReceiver<Job>, permits: Arc<Semaphore>, counters: Arc<Counters>) {
    let mut tasks: JoinSet<Outcome> = JoinSet::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            job = rx.recv(), if accepting => match job {
                Some(job) => {
                    let permits = permits.clone();
                    tasks.spawn(async move {
                        let _permit = permits.acquire_owned().await.ok();
                        debug!(task = job.name, "Task started");
                        let result = AssertUnwindSafe(job.future).catch_unwind().await;
                        (job.name, result)
                    });
                }
                None => accepting = false,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                record(joined, &counters);
            }
            else => break,
        }
    }
    debug!("Supervisor drained");
}

fn record(joined: Result<Outcome, tokio::task::JoinError>, counters: &Counters) {
    match joined {
        Ok((name, Ok(Ok(())))) => {
            counters.completed.fetch_add(1, Ordering::SeqCst);
            debug!(task = name, "Task completed");
        }
        Ok((name, Ok(Err(e)))) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            error!(task = name, error = %e, "Task failed");
        }
        Ok((name, Err(panic))) => {
            counters.panicked.fetch_add(1, Ordering::SeqCst);
            error!(task = name, "Task panicked: {}", panic_message(panic.as_ref()));
        }
        Err(e) => {
            counters.panicked.fetch_add(1, Ordering::SeqCst);
            error!("Task aborted: {}", e);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
