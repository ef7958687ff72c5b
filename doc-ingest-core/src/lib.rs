#![doc = "doc-ingest-core: fetch documents from external sources and turn them into structured JSON, in parallel and idempotently."]

//! This crate holds the whole pipeline; the `doc-ingest` binary crate only
//! parses flags and wires things together.
//!
//! # Modules
//! - [`config`]: tagged source configuration and the shared download options
//! - [`fingerprint`]: deterministic cache directory names
//! - [`contract`]: collaborator traits and error types
//! - [`document`]: the lazy per-document handle
//! - [`partition`]: default text partitioner and the element schema
//! - [`pool`]: bounded worker pool with per-item isolation
//! - [`orchestrator`]: the run loop
//! - [`connectors`]: the six source integrations and their factory

pub mod config;
pub mod connectors;
pub mod contract;
pub mod document;
pub mod fingerprint;
pub mod orchestrator;
pub mod partition;
pub mod pool;

pub use config::{DownloadConfig, SourceAction, SourceConfig};
pub use connectors::build_connector;
pub use contract::{Connector, ConnectorError, DocError, PartitionError, Partitioner, RemoteDocument};
pub use document::DocumentHandle;
pub use orchestrator::{IngestError, Orchestrator, RunOptions, RunReport};
pub use partition::{Element, TextPartitioner};
pub use pool::{PoolError, PoolReport, WorkerPool};
