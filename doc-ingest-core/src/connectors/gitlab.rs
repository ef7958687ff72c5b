use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DownloadConfig, GitLabSource};
use crate::contract::{Connector, ConnectorError, RemoteDocument};
use crate::document::DocumentHandle;

use super::{
    check_status, is_supported_extension, release_downloads, repository_path, stream_to_file,
    GlobFilter, USER_AGENT,
};

const DEFAULT_HOST: &str = "https://gitlab.com";
const PER_PAGE: u32 = 100;

/// Files of one GitLab project at one branch, read through the v4 API.
pub struct GitLabConnector {
    source: GitLabSource,
    download: DownloadConfig,
    session: Option<Session>,
}

struct Session {
    client: reqwest::Client,
    /// `<api>/projects/<url-encoded path>`
    project_url: String,
    project: String,
    branch: String,
    filter: GlobFilter,
}

#[derive(Deserialize)]
struct Project {
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// API root for a project URL: the URL's own host for full URLs, gitlab.com
/// for bare `group/project` paths.
fn api_base(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or(rest);
            format!("{scheme}://{host}/api/v4")
        }
        None => format!("{DEFAULT_HOST}/api/v4"),
    }
}

impl GitLabConnector {
    pub fn new(source: GitLabSource, download: DownloadConfig) -> Self {
        Self {
            source,
            download,
            session: None,
        }
    }

    fn session(&self) -> Result<&Session, ConnectorError> {
        self.session
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidConfig("gitlab connector used before initialize".into()))
    }
}

#[async_trait]
impl Connector for GitLabConnector {
    async fn initialize(&mut self) -> Result<(), ConnectorError> {
        let project = repository_path(&self.source.url)?;
        let filter = GlobFilter::parse(self.source.file_glob.as_deref())?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &self.source.access_token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| ConnectorError::InvalidConfig("access token is not a valid header value".into()))?;
            headers.insert("PRIVATE-TOKEN", value);
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        let project_url = format!(
            "{}/projects/{}",
            api_base(&self.source.url),
            urlencoding::encode(&project)
        );
        let branch = match &self.source.branch {
            Some(branch) => branch.clone(),
            None => {
                let resp = check_status(client.get(&project_url).send().await?).await?;
                let details: Project = resp.json().await?;
                let branch = details.default_branch.ok_or_else(|| {
                    ConnectorError::Decode(format!("project {project} has no default branch"))
                })?;
                debug!(project = %project, branch = %branch, "Resolved default branch");
                branch
            }
        };

        info!(project = %project, branch = %branch, "GitLab session ready");
        self.session = Some(Session {
            client,
            project_url,
            project,
            branch,
            filter,
        });
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<DocumentHandle>, ConnectorError> {
        let session = self.session()?;
        let mut handles = Vec::new();
        let mut page = 1u32;

        loop {
            let resp = session
                .client
                .get(format!("{}/repository/tree", session.project_url))
                .query(&[
                    ("recursive", "true".to_string()),
                    ("ref", session.branch.clone()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await?;
            let resp = check_status(resp).await?;
            let next_page = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());
            let entries: Vec<TreeEntry> = resp.json().await?;
            debug!(page, entries = entries.len(), "Fetched tree page");

            for entry in entries {
                if entry.kind != "blob"
                    || !is_supported_extension(&entry.path)
                    || !session.filter.matches(&entry.path)
                {
                    continue;
                }
                let remote = GitLabFile {
                    client: session.client.clone(),
                    url: format!(
                        "{}/repository/files/{}/raw",
                        session.project_url,
                        urlencoding::encode(&entry.path)
                    ),
                    branch: session.branch.clone(),
                };
                handles.push(DocumentHandle::new(entry.path, &self.download, Arc::new(remote)));
            }

            match next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        info!(project = %session.project, count = handles.len(), "Listed repository files");
        Ok(handles)
    }

    fn release(&mut self) {
        self.session = None;
        release_downloads("gitlab", &self.download);
    }
}

struct GitLabFile {
    client: reqwest::Client,
    url: String,
    branch: String,
}

#[async_trait]
impl RemoteDocument for GitLabFile {
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;
        stream_to_file(check_status(resp).await?, dest).await
    }
}
