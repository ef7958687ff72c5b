//! Source integrations and the factory that picks one from config.
//!
//! Each connector authenticates in `initialize`, lists documents in
//! `enumerate` without touching their content, and hands every
//! [`DocumentHandle`](crate::document::DocumentHandle) a small
//! [`RemoteDocument`](crate::contract::RemoteDocument) that knows how to pull
//! that one document later.

pub mod github;
pub mod gitlab;
pub mod google_drive;
pub mod reddit;
pub mod s3;
pub mod wikipedia;

use std::path::Path;

use futures::StreamExt;
use glob::{MatchOptions, Pattern};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{DownloadConfig, SourceAction, SourceConfig};
use crate::contract::{Connector, ConnectorError};

pub use github::GitHubConnector;
pub use gitlab::GitLabConnector;
pub use google_drive::GoogleDriveConnector;
pub use reddit::RedditConnector;
pub use s3::S3Connector;
pub use wikipedia::WikipediaConnector;

pub(crate) const USER_AGENT: &str = concat!("doc-ingest/", env!("CARGO_PKG_VERSION"));

/// Builds the connector for the configured source kind.
pub fn build_connector(config: &SourceConfig) -> Box<dyn Connector> {
    let download = config.download.clone();
    match &config.source {
        SourceAction::S3(s) => Box::new(S3Connector::new(s.clone(), download)),
        SourceAction::GitHub(g) => Box::new(GitHubConnector::new(g.clone(), download)),
        SourceAction::GitLab(g) => Box::new(GitLabConnector::new(g.clone(), download)),
        SourceAction::Reddit(r) => Box::new(RedditConnector::new(r.clone(), download)),
        SourceAction::Wikipedia(w) => Box::new(WikipediaConnector::new(w.clone(), download)),
        SourceAction::GoogleDrive(d) => Box::new(GoogleDriveConnector::new(d.clone(), download)),
    }
}

pub(crate) fn http_client(user_agent: &str) -> Result<reqwest::Client, ConnectorError> {
    Ok(reqwest::Client::builder().user_agent(user_agent).build()?)
}

/// Maps non-2xx responses to typed errors, keeping the body for the log.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ConnectorError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| String::from("<failed to decode response body>"));
    Err(match status {
        StatusCode::NOT_FOUND => ConnectorError::NotFound(url),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::Auth(format!("{url} returned {status}: {body}"))
        }
        _ => ConnectorError::Status {
            url,
            status: status.as_u16(),
            body,
        },
    })
}

/// Streams a response body into `dest`.
pub(crate) async fn stream_to_file(resp: reqwest::Response, dest: &Path) -> Result<(), ConnectorError> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut body = resp.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    debug!(path = %dest.display(), bytes = written, "Wrote download");
    Ok(())
}

/// `owner/repo` (or `group/sub/project`) from a repository URL or a bare path.
pub(crate) fn repository_path(url: &str) -> Result<String, ConnectorError> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = if url.contains("://") {
        without_scheme.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else if let Some((_, p)) = without_scheme.split_once(':').filter(|(host, _)| host.contains('@')) {
        p
    } else {
        without_scheme
    };
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.split('/').filter(|s| !s.is_empty()).count() < 2 {
        return Err(ConnectorError::InvalidConfig(format!(
            "{url} does not name a repository"
        )));
    }
    Ok(path.to_string())
}

/// Percent-encodes each segment of a slash-separated path.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Comma-separated fnmatch-style globs matched against full paths.
/// `*` also matches `/`, so `*.md` selects markdown files at any depth.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    patterns: Vec<Pattern>,
}

const FNMATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl GlobFilter {
    pub fn parse(globs: Option<&str>) -> Result<Self, ConnectorError> {
        let mut patterns = Vec::new();
        for glob in globs.unwrap_or_default().split(',') {
            let glob = glob.trim();
            if glob.is_empty() {
                continue;
            }
            let pattern = Pattern::new(glob)
                .map_err(|e| ConnectorError::InvalidConfig(format!("bad file glob {glob:?}: {e}")))?;
            patterns.push(pattern);
        }
        Ok(Self { patterns })
    }

    /// No patterns means everything matches.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches_with(path, FNMATCH))
    }
}

/// File extensions the default pipeline knows how to partition, used by the
/// git connectors to skip binaries and assets.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".txt", ".text", ".md", ".markdown", ".rst", ".org", ".html", ".htm", ".xml", ".json",
    ".csv", ".tsv", ".eml", ".msg", ".rtf", ".pdf", ".doc", ".docx", ".odt", ".ppt", ".pptx",
    ".xls", ".xlsx", ".epub", ".jpg", ".jpeg", ".png",
];

pub fn is_supported_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    match file_name.rfind('.') {
        Some(0) | None => false,
        Some(dot) => SUPPORTED_EXTENSIONS.contains(&&file_name[dot..]),
    }
}

/// Removes empty directories under `root`, and `root` itself if it ends up
/// empty. Files are never touched.
pub(crate) fn prune_empty_dirs(root: &Path) {
    fn prune(dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        let mut empty = true;
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !(is_dir && prune(&entry.path())) {
                empty = false;
            }
        }
        empty && std::fs::remove_dir(dir).is_ok()
    }

    if !root.exists() {
        return;
    }
    if prune(root) {
        debug!(path = %root.display(), "Removed empty download directory");
    }
}

/// Shared teardown for connectors: prune leftovers unless preserving.
pub(crate) fn release_downloads(kind: &str, download: &DownloadConfig) {
    if download.preserve_downloads {
        info!(source = kind, path = %download.download_dir.display(), "Preserving downloads");
        return;
    }
    prune_empty_dirs(&download.download_dir);
    if download.download_dir.exists() {
        warn!(
            source = kind,
            path = %download.download_dir.display(),
            "Download directory not empty after release"
        );
    }
}
