use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::{DownloadConfig, S3Source};
use crate::contract::{Connector, ConnectorError, RemoteDocument};
use crate::document::DocumentHandle;

use super::release_downloads;

/// Objects under an `s3://bucket/prefix` URL.
pub struct S3Connector {
    source: S3Source,
    download: DownloadConfig,
    bucket: String,
    prefix: String,
    client: Option<Client>,
}

impl S3Connector {
    pub fn new(source: S3Source, download: DownloadConfig) -> Self {
        Self {
            source,
            download,
            bucket: String::new(),
            prefix: String::new(),
            client: None,
        }
    }

    fn client(&self) -> Result<&Client, ConnectorError> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectorError::InvalidConfig("s3 connector used before initialize".into()))
    }
}

/// Splits `s3://bucket/some/prefix` into bucket and key prefix.
pub fn parse_s3_url(url: &str) -> Result<(String, String), ConnectorError> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| ConnectorError::InvalidConfig(format!("{url} is not an s3:// url")))?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(ConnectorError::InvalidConfig(format!("{url} has no bucket")));
    }
    Ok((bucket.to_string(), prefix.to_string()))
}

/// Identity of an object relative to the configured prefix. A prefix that
/// names a single object yields that object's file name.
fn object_identity(prefix: &str, key: &str) -> String {
    let relative = key.strip_prefix(prefix).unwrap_or(key).trim_start_matches('/');
    if relative.is_empty() {
        key.rsplit('/').next().unwrap_or(key).to_string()
    } else {
        relative.to_string()
    }
}

#[async_trait]
impl Connector for S3Connector {
    async fn initialize(&mut self) -> Result<(), ConnectorError> {
        let (bucket, prefix) = parse_s3_url(&self.source.url)?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if self.source.anonymous {
            loader = loader.no_credentials();
        }
        if let Some(region) = &self.source.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &self.source.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        self.client = Some(Client::from_conf(builder.build()));

        info!(
            bucket = %bucket,
            prefix = %prefix,
            anonymous = self.source.anonymous,
            "S3 client initialized"
        );
        self.bucket = bucket;
        self.prefix = prefix;
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<DocumentHandle>, ConnectorError> {
        let client = self.client()?;
        let mut handles = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| ConnectorError::Storage(format!("list s3://{}/{}: {e}", self.bucket, self.prefix)))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                let remote = S3Object {
                    client: client.clone(),
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                };
                handles.push(DocumentHandle::new(
                    object_identity(&self.prefix, key),
                    &self.download,
                    Arc::new(remote),
                ));
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        info!(bucket = %self.bucket, count = handles.len(), "Listed S3 objects");
        Ok(handles)
    }

    fn release(&mut self) {
        self.client = None;
        release_downloads("s3", &self.download);
    }
}

struct S3Object {
    client: Client,
    bucket: String,
    key: String,
}

#[async_trait]
impl RemoteDocument for S3Object {
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError> {
        debug!(bucket = %self.bucket, key = %self.key, "Fetching S3 object");
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| ConnectorError::Storage(format!("get s3://{}/{}: {e}", self.bucket, self.key)))?;

        let mut body = object.body;
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| ConnectorError::Storage(format!("read s3://{}/{}: {e}", self.bucket, self.key)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
