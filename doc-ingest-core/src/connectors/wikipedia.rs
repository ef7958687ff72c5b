use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DownloadConfig, WikipediaSource};
use crate::contract::{Connector, ConnectorError, RemoteDocument};
use crate::document::DocumentHandle;

use super::{check_status, http_client, release_downloads, USER_AGENT};

const DEFAULT_SITE: &str = "https://en.wikipedia.org";

/// One article, exposed as three documents: rendered HTML, plain text and
/// the plain-text summary.
pub struct WikipediaConnector {
    source: WikipediaSource,
    download: DownloadConfig,
    session: Option<Session>,
}

#[derive(Clone)]
struct Session {
    client: reqwest::Client,
    api: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Html,
    Text,
    Summary,
}

impl Variant {
    const ALL: [Variant; 3] = [Variant::Html, Variant::Text, Variant::Summary];

    fn identity(self, title: &str) -> String {
        match self {
            Variant::Html => format!("{title}-html.html"),
            Variant::Text => format!("{title}-text.txt"),
            Variant::Summary => format!("{title}-summary.txt"),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct PagesResponse {
    query: PagesQuery,
}

#[derive(Deserialize)]
struct PagesQuery {
    pages: Vec<Page>,
}

#[derive(Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    extract: Option<String>,
}

#[derive(Deserialize)]
struct ParseResponse {
    parse: Parsed,
}

#[derive(Deserialize)]
struct Parsed {
    text: String,
}

impl Session {
    async fn get<T: for<'de> Deserialize<'de>>(&self, params: &[(&str, &str)]) -> Result<T, ConnectorError> {
        let resp = self
            .client
            .get(&self.api)
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await?;
        let body = check_status(resp).await?.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ConnectorError::Decode(format!("wikipedia response for {params:?}: {e}"))
        })
    }

    /// Canonical title of an existing page, optionally resolving the query
    /// through search first.
    async fn resolve_title(&self, title: &str, auto_suggest: bool) -> Result<String, ConnectorError> {
        let mut candidate = title.to_string();
        if auto_suggest {
            let found: SearchResponse = self
                .get(&[("action", "query"), ("list", "search"), ("srsearch", title), ("srlimit", "1")])
                .await?;
            if let Some(hit) = found.query.search.into_iter().next() {
                debug!(query = %title, resolved = %hit.title, "Search suggested a title");
                candidate = hit.title;
            }
        }

        let pages: PagesResponse = self
            .get(&[("action", "query"), ("titles", candidate.as_str()), ("redirects", "1")])
            .await?;
        match pages.query.pages.into_iter().next() {
            Some(page) if !page.missing => Ok(page.title),
            _ => Err(ConnectorError::NotFound(format!("wikipedia page {candidate:?}"))),
        }
    }
}

impl WikipediaConnector {
    pub fn new(source: WikipediaSource, download: DownloadConfig) -> Self {
        Self {
            source,
            download,
            session: None,
        }
    }
}

#[async_trait]
impl Connector for WikipediaConnector {
    async fn initialize(&mut self) -> Result<(), ConnectorError> {
        let site = self
            .source
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_SITE)
            .trim_end_matches('/');
        self.session = Some(Session {
            client: http_client(USER_AGENT)?,
            api: format!("{site}/w/api.php"),
        });
        info!(site = %site, page = %self.source.page_title, "Wikipedia session ready");
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<DocumentHandle>, ConnectorError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidConfig("wikipedia connector used before initialize".into()))?;
        let title = session
            .resolve_title(&self.source.page_title, self.source.auto_suggest)
            .await?;

        let handles = Variant::ALL
            .into_iter()
            .map(|variant| {
                let remote = WikipediaArticle {
                    session: session.clone(),
                    title: title.clone(),
                    variant,
                };
                DocumentHandle::new(variant.identity(&title), &self.download, Arc::new(remote))
            })
            .collect::<Vec<_>>();
        info!(title = %title, count = handles.len(), "Listed article documents");
        Ok(handles)
    }

    fn release(&mut self) {
        self.session = None;
        release_downloads("wikipedia", &self.download);
    }
}

struct WikipediaArticle {
    session: Session,
    title: String,
    variant: Variant,
}

#[async_trait]
impl RemoteDocument for WikipediaArticle {
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError> {
        let title = self.title.as_str();
        let content = match self.variant {
            Variant::Html => {
                let parsed: ParseResponse = self
                    .session
                    .get(&[("action", "parse"), ("page", title), ("prop", "text")])
                    .await?;
                parsed.parse.text
            }
            Variant::Text | Variant::Summary => {
                let mut params = vec![
                    ("action", "query"),
                    ("prop", "extracts"),
                    ("explaintext", "1"),
                    ("titles", title),
                ];
                if self.variant == Variant::Summary {
                    params.push(("exintro", "1"));
                }
                let pages: PagesResponse = self.session.get(&params).await?;
                pages
                    .query
                    .pages
                    .into_iter()
                    .next()
                    .and_then(|page| page.extract)
                    .ok_or_else(|| ConnectorError::Decode(format!("no extract for {title:?}")))?
            }
        };
        tokio::fs::write(dest, content).await?;
        Ok(())
    }
}
