//! Bounded worker pool with a per-item error boundary.
//!
//! `num_processes` tokio tasks drain a shared queue. Each item runs in its own
//! child task, so a panic or a timeout in one item becomes a
//! [`DocError`] for that item while its siblings carry on. Dropping the pool's
//! future aborts every worker and, through them, every in-flight item.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::contract::DocError;
use crate::document::panic_message;

/// Something the pool can name in logs and reports.
pub trait WorkItem {
    fn label(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker task lost: {0}")]
    WorkerLost(#[from] JoinError),
}

#[derive(Debug)]
pub struct DocFailure {
    pub identity: String,
    pub error: DocError,
}

/// What happened to every item handed to [`WorkerPool::run`].
#[derive(Debug, Default)]
pub struct PoolReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<DocFailure>,
}

impl PoolReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    item_timeout: Option<Duration>,
}

impl WorkerPool {
    /// A pool of `workers` tasks; zero is treated as one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            item_timeout: None,
        }
    }

    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` once per item with at most `workers` items in flight and
    /// waits for all of them. Per-item failures land in the report; only a
    /// lost worker task is an error.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, job: F) -> Result<PoolReport, PoolError>
    where
        T: WorkItem + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DocError>> + Send + 'static,
    {
        let total = items.len();
        let mut report = PoolReport::default();
        if total == 0 {
            return Ok(report);
        }

        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let job = Arc::new(job);
        let parent = Span::current();
        let spawned = self.workers.min(total);
        info!(workers = spawned, items = total, "Starting worker pool");

        let mut workers = JoinSet::new();
        for worker in 0..spawned {
            let queue = Arc::clone(&queue);
            let job = Arc::clone(&job);
            let timeout = self.item_timeout;
            let span = info_span!(parent: &parent, "worker", worker);
            workers.spawn(
                async move {
                    let mut outcomes = Vec::new();
                    loop {
                        let next = queue.lock().await.pop_front();
                        let Some(item) = next else { break };
                        let label = item.label();
                        let outcome = run_item(item, Arc::clone(&job), timeout)
                            .instrument(info_span!("document", identity = %label))
                            .await;
                        match &outcome {
                            Ok(()) => debug!(identity = %label, "Document done"),
                            Err(e) => error!(identity = %label, error = %e, "Document failed"),
                        }
                        outcomes.push((label, outcome));
                    }
                    outcomes
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            for (label, outcome) in joined? {
                match outcome {
                    Ok(()) => report.succeeded.push(label),
                    Err(error) => report.failed.push(DocFailure {
                        identity: label,
                        error,
                    }),
                }
            }
        }
        Ok(report)
    }
}

async fn run_item<T, F, Fut>(item: T, job: Arc<F>, timeout: Option<Duration>) -> Result<(), DocError>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DocError>> + Send + 'static,
{
    let mut task = JoinSet::new();
    task.spawn(async move { (*job)(item).await }.instrument(Span::current()));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task.join_next()).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort_all();
                // Wait for the aborted item to be dropped so its output
                // cannot appear after the timeout is reported.
                while task.join_next().await.is_some() {}
                return Err(DocError::TimedOut(limit));
            }
        },
        None => task.join_next().await,
    };

    match joined {
        Some(Ok(result)) => result,
        Some(Err(e)) if e.is_panic() => Err(DocError::Panicked(panic_message(e.into_panic()))),
        Some(Err(_)) | None => Err(DocError::Cancelled),
    }
}
