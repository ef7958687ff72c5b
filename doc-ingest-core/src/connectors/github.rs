use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DownloadConfig, GitHubSource};
use crate::contract::{Connector, ConnectorError, RemoteDocument};
use crate::document::DocumentHandle;

use super::{
    check_status, encode_path, is_supported_extension, release_downloads, repository_path,
    stream_to_file, GlobFilter, USER_AGENT,
};

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Files of one GitHub repository at one branch, read through the REST API.
pub struct GitHubConnector {
    source: GitHubSource,
    download: DownloadConfig,
    session: Option<Session>,
}

struct Session {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    branch: String,
    filter: GlobFilter,
}

#[derive(Deserialize)]
struct Repository {
    default_branch: String,
}

#[derive(Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitHubConnector {
    pub fn new(source: GitHubSource, download: DownloadConfig) -> Self {
        Self {
            source,
            download,
            session: None,
        }
    }

    fn headers(&self) -> Result<HeaderMap, ConnectorError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = &self.source.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ConnectorError::InvalidConfig("access token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Connector for GitHubConnector {
    async fn initialize(&mut self) -> Result<(), ConnectorError> {
        let repo = repository_path(&self.source.url)?;
        let filter = GlobFilter::parse(self.source.file_glob.as_deref())?;
        let api_base = self
            .source
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(self.headers()?)
            .build()?;

        let branch = match &self.source.branch {
            Some(branch) => branch.clone(),
            None => {
                let url = format!("{api_base}/repos/{repo}");
                let resp = check_status(client.get(&url).send().await?).await?;
                let repository: Repository = resp.json().await?;
                debug!(repo = %repo, branch = %repository.default_branch, "Resolved default branch");
                repository.default_branch
            }
        };

        info!(repo = %repo, branch = %branch, "GitHub session ready");
        self.session = Some(Session {
            client,
            api_base,
            repo,
            branch,
            filter,
        });
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<DocumentHandle>, ConnectorError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidConfig("github connector used before initialize".into()))?;

        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            session.api_base,
            session.repo,
            urlencoding::encode(&session.branch)
        );
        let resp = check_status(session.client.get(&url).send().await?).await?;
        let tree: Tree = resp.json().await?;
        if tree.truncated {
            tracing::warn!(repo = %session.repo, "Repository tree listing was truncated by the API");
        }

        let handles: Vec<DocumentHandle> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .filter(|entry| is_supported_extension(&entry.path) && session.filter.matches(&entry.path))
            .map(|entry| {
                let remote = GitHubFile {
                    client: session.client.clone(),
                    url: format!(
                        "{}/repos/{}/contents/{}?ref={}",
                        session.api_base,
                        session.repo,
                        encode_path(&entry.path),
                        urlencoding::encode(&session.branch)
                    ),
                };
                DocumentHandle::new(entry.path, &self.download, Arc::new(remote))
            })
            .collect();

        info!(repo = %session.repo, count = handles.len(), "Listed repository files");
        Ok(handles)
    }

    fn release(&mut self) {
        self.session = None;
        release_downloads("github", &self.download);
    }
}

struct GitHubFile {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl RemoteDocument for GitHubFile {
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError> {
        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/vnd.github.raw")
            .send()
            .await?;
        stream_to_file(check_status(resp).await?, dest).await
    }
}
