//! The lazy per-document handle.
//!
//! A [`DocumentHandle`] is created during enumeration with nothing but an
//! identity and a fetch strategy. Content is pulled by [`DocumentHandle::fetch`],
//! turned into JSON by [`DocumentHandle::process`], and the local copy is
//! removed by [`DocumentHandle::release`] unless downloads are preserved.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::contract::{DocError, Partitioner, RemoteDocument};
use crate::partition::Element;
use crate::pool::WorkItem;

pub struct DocumentHandle {
    identity: String,
    download_path: PathBuf,
    output_path: PathBuf,
    re_download: bool,
    preserve_downloads: bool,
    downloaded: bool,
    processed: bool,
    released: bool,
    remote: Arc<dyn RemoteDocument>,
}

impl DocumentHandle {
    /// No I/O happens here; both paths are derived from the identity.
    pub fn new(
        identity: impl Into<String>,
        download: &DownloadConfig,
        remote: Arc<dyn RemoteDocument>,
    ) -> Self {
        let identity = identity.into();
        let (download_path, output_path) = download.paths_for(&identity);
        Self {
            identity,
            download_path,
            output_path,
            re_download: download.re_download,
            preserve_downloads: download.preserve_downloads,
            downloaded: false,
            processed: false,
            released: false,
            remote,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn download_path(&self) -> &Path {
        &self.download_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn is_downloaded(&self) -> bool {
        self.downloaded
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// True when a structured output already exists for this identity.
    pub fn has_output(&self) -> bool {
        self.output_path.is_file()
    }

    /// Pulls the document into its download path.
    ///
    /// An existing local copy is reused unless re-download was requested.
    /// Content is written to a `.part` sibling first and renamed into place,
    /// so an interrupted download never looks like a complete one.
    pub async fn fetch(&mut self) -> Result<(), DocError> {
        if !self.re_download && self.download_path.is_file() {
            debug!(
                identity = %self.identity,
                path = %self.download_path.display(),
                "Local copy exists, skipping download"
            );
            self.downloaded = true;
            return Ok(());
        }

        if let Some(parent) = self.download_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&self.download_path);
        debug!(identity = %self.identity, path = %partial.display(), "Downloading");

        if let Err(e) = self.remote.download(&partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DocError::Download(e));
        }
        tokio::fs::rename(&partial, &self.download_path).await?;

        self.downloaded = true;
        info!(
            identity = %self.identity,
            path = %self.download_path.display(),
            "Downloaded document"
        );
        Ok(())
    }

    /// Partitions the local copy and writes the structured output.
    ///
    /// Partitioning runs on the blocking pool. The output is written to a
    /// temporary file in the output directory and persisted over the final
    /// path, so readers only ever see a complete file. If this future is
    /// dropped (timeout, cancellation) while the blocking job still runs,
    /// the job discards its result instead of persisting it.
    pub async fn process(&mut self, partitioner: Arc<dyn Partitioner>) -> Result<(), DocError> {
        if !self.downloaded {
            return Err(DocError::NotFetched);
        }

        let source = self.download_path.clone();
        let output = self.output_path.clone();
        let mut guard = AbandonOnDrop::default();
        let abandoned = Arc::clone(&guard.abandoned);
        let written = tokio::task::spawn_blocking(move || -> Result<usize, DocError> {
            let elements = partitioner.partition(&source)?;
            write_output(&output, &elements, &abandoned)?;
            Ok(elements.len())
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                DocError::Panicked(panic_message(e.into_panic()))
            } else {
                DocError::Cancelled
            }
        })??;
        guard.armed = false;

        self.processed = true;
        info!(
            identity = %self.identity,
            elements = written,
            output = %self.output_path.display(),
            "Wrote structured output"
        );
        Ok(())
    }

    /// Removes the local copy unless downloads are preserved. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.preserve_downloads {
            return;
        }
        match std::fs::remove_file(&self.download_path) {
            Ok(()) => debug!(
                identity = %self.identity,
                path = %self.download_path.display(),
                "Removed local copy"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                identity = %self.identity,
                path = %self.download_path.display(),
                error = ?e,
                "Failed to remove local copy"
            ),
        }
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        if self.downloaded && !self.released {
            self.release();
        }
    }
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("identity", &self.identity)
            .field("download_path", &self.download_path)
            .field("output_path", &self.output_path)
            .field("downloaded", &self.downloaded)
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

impl WorkItem for DocumentHandle {
    fn label(&self) -> String {
        self.identity.clone()
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    path.with_file_name(name)
}

/// Marks the blocking job of a dropped `process` call as abandoned. The flag
/// is taken under the same lock the job holds while persisting, so once the
/// drop returns no output can appear for this call.
struct AbandonOnDrop {
    abandoned: Arc<Mutex<bool>>,
    armed: bool,
}

impl Default for AbandonOnDrop {
    fn default() -> Self {
        Self {
            abandoned: Arc::new(Mutex::new(false)),
            armed: true,
        }
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if self.armed {
            *self.abandoned.lock().unwrap_or_else(PoisonError::into_inner) = true;
        }
    }
}

fn write_output(path: &Path, elements: &[Element], abandoned: &Mutex<bool>) -> Result<(), DocError> {
    let write_err = |source| DocError::Write {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let json = serde_json::to_vec_pretty(elements).map_err(crate::contract::PartitionError::from)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;

    let abandoned = abandoned.lock().unwrap_or_else(PoisonError::into_inner);
    if *abandoned {
        debug!(path = %path.display(), "Discarding output of an abandoned document");
        return Err(DocError::Cancelled);
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
