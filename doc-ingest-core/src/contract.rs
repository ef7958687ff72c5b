//! # contract: the seams between the orchestrator and its collaborators
//!
//! Three traits define everything the run loop needs from the outside world:
//!
//! - [`Connector`]: one per source kind. Authenticates, enumerates lazy
//!   [`DocumentHandle`]s, and tears its session down again.
//! - [`RemoteDocument`]: the per-document fetch strategy a connector hands to
//!   each handle. Knows how to pull one document's bytes into a local path.
//! - [`Partitioner`]: turns a local copy into structured [`Element`]s.
//!
//! All three are annotated for `mockall` so the orchestrator and the worker
//! pool can be exercised without any network access. The mocks are exported
//! behind the `test-export-mocks` feature for the integration suites.
//!
//! ## Errors
//! Errors are split by blast radius. [`ConnectorError`] is what a connector
//! reports; the orchestrator decides whether it is fatal (initialize,
//! enumerate) or per-document (wrapped into [`DocError::Download`]).
//! [`DocError`] never escapes the worker boundary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::document::DocumentHandle;
use crate::partition::Element;

/// Errors raised by a source connector or by one of its remote documents.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while turning a local copy into structured elements.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document: {0}")]
    Unsupported(String),

    #[error("failed to serialize elements: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("partitioner failed to initialize: {0}")]
    Init(String),
}

/// A failure scoped to one document. Reported and counted, never propagated
/// past the worker that hit it.
#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("download failed: {0}")]
    Download(#[source] ConnectorError),

    #[error("document was processed before being fetched")]
    NotFetched,

    #[error("partitioning failed: {0}")]
    Partition(#[from] PartitionError),

    #[error("failed to write structured output {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("task cancelled before completion")]
    Cancelled,
}

/// A source of documents: object storage, a git host, a forum, an
/// encyclopedia, a shared drive.
///
/// Lifecycle: constructed from a [`crate::config::SourceConfig`], then
/// `initialize` → `enumerate` → (documents are processed elsewhere) →
/// `release`. `release` must be idempotent; the orchestrator guarantees it
/// runs exactly once per run on every exit path.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session and credential setup. Any error here aborts the run.
    async fn initialize(&mut self) -> Result<(), ConnectorError>;

    /// Lists every document visible under the configured filters.
    ///
    /// Metadata only: implementors must not download document content here.
    async fn enumerate(&self) -> Result<Vec<DocumentHandle>, ConnectorError>;

    /// Drops sessions and, unless downloads are preserved, prunes empty
    /// directories left in the download directory.
    fn release(&mut self);
}

/// How one document's bytes are pulled from its source.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteDocument: Send + Sync {
    /// Writes the full document content to `dest`. The parent directory
    /// already exists; `dest` itself may be overwritten.
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError>;
}

/// Turns a local file into structured elements.
///
/// Partitioning is local compute; the worker pool runs it on the blocking
/// thread pool, so implementors may block freely.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Partitioner: Send + Sync {
    /// One-time setup before any document is processed (model loading,
    /// dictionaries). Failure aborts the run.
    fn initialize(&self) -> Result<(), PartitionError>;

    fn partition(&self, path: &Path) -> Result<Vec<Element>, PartitionError>;
}
