//! The run loop: initialize → enumerate → filter → dispatch → release.
//!
//! One [`Orchestrator::run`] drives a single connector through its lifecycle
//! and hands every document that still lacks a structured output to the
//! [`WorkerPool`]. Per-document failures are counted, not propagated; the run
//! itself fails only when the connector or partitioner cannot start, when
//! enumeration fails, when a worker task is lost, or when every attempted
//! document failed.
//!
//! The connector is owned by a [`ConnectorSession`] guard for the whole run,
//! so `release` runs exactly once on every exit path, including early errors,
//! panics and cancellation of the run future.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::contract::{Connector, ConnectorError, DocError, PartitionError, Partitioner};
use crate::document::DocumentHandle;
use crate::pool::{DocFailure, PoolError, WorkerPool};

pub const DEFAULT_NUM_PROCESSES: usize = 2;

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub num_processes: usize,
    /// Process documents even when their structured output exists.
    pub reprocess: bool,
    /// Per-document limit for fetch plus process.
    pub item_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_processes: DEFAULT_NUM_PROCESSES,
            reprocess: false,
            item_timeout: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connector failed to initialize: {0}")]
    ConnectorInit(#[source] ConnectorError),

    #[error("failed to enumerate documents: {0}")]
    Enumeration(#[source] ConnectorError),

    #[error("partitioner failed to initialize: {0}")]
    ProcessorInit(#[source] PartitionError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("all {attempted} attempted documents failed")]
    NothingProcessed {
        attempted: usize,
        failed: Vec<DocFailure>,
    },
}

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Documents enumerated by the connector.
    pub total: usize,
    /// Documents skipped because their output already existed.
    pub skipped: usize,
    /// Documents handed to the pool.
    pub attempted: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<DocFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Initializing,
    Enumerating,
    Filtering,
    Dispatching,
    Releasing,
    Done,
    Aborted,
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?*state, to = ?next, "Run state change");
    *state = next;
}

/// Owns the connector for a run and releases it exactly once.
pub struct ConnectorSession {
    connector: Box<dyn Connector>,
    released: bool,
}

impl ConnectorSession {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            released: false,
        }
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.connector.release();
        debug!("Connector released");
    }
}

impl Deref for ConnectorSession {
    type Target = dyn Connector;

    fn deref(&self) -> &Self::Target {
        self.connector.as_ref()
    }
}

impl DerefMut for ConnectorSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connector.as_mut()
    }
}

impl Drop for ConnectorSession {
    fn drop(&mut self) {
        if !self.released {
            warn!("Connector session dropped before release, releasing now");
            self.release();
        }
    }
}

pub struct Orchestrator {
    options: RunOptions,
    partitioner: Arc<dyn Partitioner>,
}

impl Orchestrator {
    pub fn new(options: RunOptions, partitioner: Arc<dyn Partitioner>) -> Self {
        Self {
            options,
            partitioner,
        }
    }

    pub async fn run(&self, connector: Box<dyn Connector>) -> Result<RunReport, IngestError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id);
        self.run_inner(connector).instrument(span).await
    }

    async fn run_inner(&self, connector: Box<dyn Connector>) -> Result<RunReport, IngestError> {
        let mut state = RunState::Idle;
        let mut session = ConnectorSession::new(connector);
        info!(
            num_processes = self.options.num_processes,
            reprocess = self.options.reprocess,
            "Starting ingest run"
        );

        transition(&mut state, RunState::Initializing);
        if let Err(e) = session.initialize().await {
            error!(error = %e, "Connector initialization failed");
            transition(&mut state, RunState::Aborted);
            session.release();
            return Err(IngestError::ConnectorInit(e));
        }
        if let Err(e) = self.partitioner.initialize() {
            error!(error = %e, "Partitioner initialization failed");
            transition(&mut state, RunState::Aborted);
            session.release();
            return Err(IngestError::ProcessorInit(e));
        }

        transition(&mut state, RunState::Enumerating);
        let handles = match session.enumerate().await {
            Ok(handles) => handles,
            Err(e) => {
                error!(error = %e, "Enumeration failed");
                transition(&mut state, RunState::Aborted);
                session.release();
                return Err(IngestError::Enumeration(e));
            }
        };

        transition(&mut state, RunState::Filtering);
        let total = handles.len();
        info!(total, "Enumerated documents");
        let pending: Vec<DocumentHandle> = if self.options.reprocess {
            handles
        } else {
            handles.into_iter().filter(|doc| !doc.has_output()).collect()
        };
        let skipped = total - pending.len();

        let mut report = RunReport {
            total,
            skipped,
            ..RunReport::default()
        };

        if pending.is_empty() {
            if total == 0 {
                info!("Source has no documents, nothing to do.");
            } else {
                info!("All docs have structured outputs, nothing to do. Use --reprocess to process all.");
            }
            transition(&mut state, RunState::Releasing);
            session.release();
            transition(&mut state, RunState::Done);
            return Ok(report);
        }
        if skipped > 0 {
            info!(
                skipped,
                total,
                "Skipping processing for {skipped} docs out of {total} since their structured outputs already exist, use --reprocess to reprocess those in addition to the unprocessed ones."
            );
        }

        transition(&mut state, RunState::Dispatching);
        report.attempted = pending.len();
        let pool = WorkerPool::new(self.options.num_processes)
            .with_item_timeout(self.options.item_timeout);
        let partitioner = Arc::clone(&self.partitioner);
        let outcome = pool
            .run(pending, move |doc: DocumentHandle| {
                fetch_and_process(doc, Arc::clone(&partitioner))
            })
            .await;

        transition(&mut state, RunState::Releasing);
        session.release();

        let pool_report = match outcome {
            Ok(pool_report) => pool_report,
            Err(e) => {
                error!(error = %e, "Worker pool failed");
                transition(&mut state, RunState::Aborted);
                return Err(e.into());
            }
        };
        report.succeeded = pool_report.succeeded;
        report.failed = pool_report.failed;
        transition(&mut state, RunState::Done);

        info!(
            total = report.total,
            skipped = report.skipped,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Ingest run finished"
        );
        for failure in &report.failed {
            warn!(identity = %failure.identity, error = %failure.error, "Document not processed");
        }

        if report.succeeded.is_empty() {
            return Err(IngestError::NothingProcessed {
                attempted: report.attempted,
                failed: report.failed,
            });
        }
        Ok(report)
    }
}

/// One worker's job: fetch, process, and always release the local copy.
async fn fetch_and_process(
    mut doc: DocumentHandle,
    partitioner: Arc<dyn Partitioner>,
) -> Result<(), DocError> {
    let result = match doc.fetch().await {
        Ok(()) => doc.process(partitioner).await,
        Err(e) => Err(e),
    };
    doc.release();
    result
}
