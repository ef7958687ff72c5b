use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DownloadConfig, RedditSource};
use crate::contract::{Connector, ConnectorError, RemoteDocument};
use crate::document::DocumentHandle;

use super::{check_status, http_client, release_downloads};

const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";
const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
/// Listing endpoints cap `limit` at this value.
const MAX_PAGE: usize = 100;

/// Posts of one subreddit: hot posts, or the results of a search.
pub struct RedditConnector {
    source: RedditSource,
    download: DownloadConfig,
    session: Option<Session>,
}

#[derive(Clone)]
struct Session {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<Child>,
    after: Option<String>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    selftext: String,
}

impl RedditConnector {
    pub fn new(source: RedditSource, download: DownloadConfig) -> Self {
        Self {
            source,
            download,
            session: None,
        }
    }

    fn listing_url(&self, api_base: &str) -> String {
        let sub = urlencoding::encode(&self.source.subreddit_name);
        match &self.source.search_query {
            Some(_) => format!("{api_base}/r/{sub}/search"),
            None => format!("{api_base}/r/{sub}/hot"),
        }
    }
}

#[async_trait]
impl Connector for RedditConnector {
    async fn initialize(&mut self) -> Result<(), ConnectorError> {
        let (Some(client_id), Some(client_secret)) =
            (&self.source.client_id, &self.source.client_secret)
        else {
            return Err(ConnectorError::InvalidConfig(
                "reddit needs a client id and a client secret".into(),
            ));
        };

        let client = http_client(&self.source.user_agent)?;
        let auth_base = self
            .source
            .auth_base
            .as_deref()
            .unwrap_or(DEFAULT_AUTH_BASE)
            .trim_end_matches('/');
        let resp = client
            .post(format!("{auth_base}/api/v1/access_token"))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = check_status(resp)
            .await
            .map_err(|e| ConnectorError::Auth(format!("reddit token request failed: {e}")))?
            .json()
            .await?;

        info!(subreddit = %self.source.subreddit_name, "Reddit session ready");
        self.session = Some(Session {
            client,
            api_base: self
                .source
                .api_base
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            token: token.access_token,
        });
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<DocumentHandle>, ConnectorError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidConfig("reddit connector used before initialize".into()))?;
        let url = self.listing_url(&session.api_base);
        let wanted = self.source.num_posts;
        let mut handles = Vec::new();
        let mut after: Option<String> = None;

        while handles.len() < wanted {
            let limit = (wanted - handles.len()).min(MAX_PAGE);
            let mut query = vec![("limit", limit.to_string()), ("raw_json", "1".to_string())];
            if let Some(q) = &self.source.search_query {
                query.push(("q", q.clone()));
                query.push(("restrict_sr", "1".to_string()));
            }
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let resp = session
                .client
                .get(&url)
                .bearer_auth(&session.token)
                .query(&query)
                .send()
                .await?;
            let listing: Listing = check_status(resp).await?.json().await?;
            let fetched = listing.data.children.len();
            debug!(fetched, after = ?listing.data.after, "Fetched listing page");

            for child in listing.data.children.into_iter().take(wanted - handles.len()) {
                let post = child.data;
                let remote = RedditPost {
                    session: session.clone(),
                    id: post.id.clone(),
                };
                handles.push(DocumentHandle::new(
                    format!("{}.md", post.id),
                    &self.download,
                    Arc::new(remote),
                ));
            }

            match listing.data.after {
                Some(next) if fetched > 0 => after = Some(next),
                _ => break,
            }
        }

        info!(subreddit = %self.source.subreddit_name, count = handles.len(), "Listed posts");
        Ok(handles)
    }

    fn release(&mut self) {
        self.session = None;
        release_downloads("reddit", &self.download);
    }
}

struct RedditPost {
    session: Session,
    id: String,
}

#[async_trait]
impl RemoteDocument for RedditPost {
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError> {
        let resp = self
            .session
            .client
            .get(format!("{}/api/info", self.session.api_base))
            .bearer_auth(&self.session.token)
            .query(&[("id", format!("t3_{}", self.id)), ("raw_json", "1".to_string())])
            .send()
            .await?;
        let listing: Listing = check_status(resp).await?.json().await?;
        let post = listing
            .data
            .children
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::NotFound(format!("reddit post {}", self.id)))?
            .data;
        tokio::fs::write(dest, post.selftext).await?;
        Ok(())
    }
}
