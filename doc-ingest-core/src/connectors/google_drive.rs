//! Google Drive files and folders, authenticated as a service account.
//!
//! The service account key is exchanged for an access token with a signed
//! RS256 JWT assertion. Folders are listed page by page and, when recursion
//! is on, walked depth-first; sub-folder names become path segments of the
//! document identity. Google-native documents have no bytes of their own and
//! are exported to text formats instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DownloadConfig, GoogleDriveSource};
use crate::contract::{Connector, ConnectorError, RemoteDocument};
use crate::document::DocumentHandle;

use super::{check_status, http_client, release_downloads, stream_to_file, USER_AGENT};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const TOKEN_LIFETIME_SECS: i64 = 3600;

pub struct GoogleDriveConnector {
    source: GoogleDriveSource,
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
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Export target for Google-native documents: mime type and file extension.
fn export_format(mime_type: &str) -> Option<(&'static str, &'static str)> {
    match mime_type {
        "application/vnd.google-apps.document" => Some(("text/plain", ".txt")),
        "application/vnd.google-apps.spreadsheet" => Some(("text/csv", ".csv")),
        "application/vnd.google-apps.presentation" => Some(("text/plain", ".txt")),
        _ => None,
    }
}

fn is_google_native(mime_type: &str) -> bool {
    mime_type.starts_with("application/vnd.google-apps.")
}

/// `.docx` and `docx` both match `report.DOCX`.
fn has_extension(name: &str, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
    name.to_ascii_lowercase()
        .rsplit_once('.')
        .map(|(_, ext)| ext == wanted)
        .unwrap_or(false)
}

impl GoogleDriveConnector {
    pub fn new(source: GoogleDriveSource, download: DownloadConfig) -> Self {
        Self {
            source,
            download,
            session: None,
        }
    }

    fn key_path(&self) -> Result<PathBuf, ConnectorError> {
        self.source
            .service_account_key
            .clone()
            .or_else(|| std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from))
            .ok_or_else(|| {
                ConnectorError::InvalidConfig(
                    "no service account key given and GOOGLE_APPLICATION_CREDENTIALS is unset".into(),
                )
            })
    }

    /// Builds the handle for one listed file under its final name, or `None`
    /// when the extension filter rejects it.
    fn handle_for(&self, session: &Session, entry: Listed, prefix: &str) -> Option<DocumentHandle> {
        let Listed::File { id, name, fetch } = entry else {
            return None;
        };
        if let Some(ext) = &self.source.extension {
            if !has_extension(&name, ext) {
                return None;
            }
        }
        let remote = DriveDocument {
            session: session.clone(),
            file_id: id,
            fetch,
        };
        Some(DocumentHandle::new(
            format!("{prefix}{name}"),
            &self.download,
            Arc::new(remote),
        ))
    }
}

/// One entry of a folder listing that survives export selection.
enum Listed {
    Folder { id: String, name: String },
    File { id: String, name: String, fetch: Fetch },
}

impl Listed {
    /// Google-native documents are exported and gain the export extension.
    /// `None` for native types with no export format.
    fn from_drive(file: DriveFile) -> Option<Self> {
        if file.mime_type == FOLDER_MIME {
            return Some(Listed::Folder {
                id: file.id,
                name: file.name,
            });
        }
        if is_google_native(&file.mime_type) {
            let (export_mime, ext) = export_format(&file.mime_type)?;
            return Some(Listed::File {
                id: file.id,
                name: format!("{}{}", file.name, ext),
                fetch: Fetch::Export(export_mime),
            });
        }
        Some(Listed::File {
            id: file.id,
            name: file.name,
            fetch: Fetch::Media,
        })
    }

    fn name_mut(&mut self) -> &mut String {
        match self {
            Listed::Folder { name, .. } | Listed::File { name, .. } => name,
        }
    }

    fn id(&self) -> &str {
        match self {
            Listed::Folder { id, .. } | Listed::File { id, .. } => id,
        }
    }
}

/// Drive allows several entries with one name in a folder. Every entry whose
/// name repeats gets its file id added, independent of listing order.
fn disambiguate(entries: &mut [Listed]) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in entries.iter_mut() {
        *counts.entry(entry.name_mut().clone()).or_default() += 1;
    }
    for entry in entries.iter_mut() {
        let id = entry.id().to_string();
        let keep_extension = matches!(entry, Listed::File { .. });
        let name = entry.name_mut();
        if counts.get(name.as_str()).copied().unwrap_or(0) > 1 {
            *name = with_id(name, &id, keep_extension);
        }
    }
}

/// `report.txt` + `id2` → `report (id2).txt`.
fn with_id(name: &str, id: &str, keep_extension: bool) -> String {
    match name.rfind('.').filter(|&dot| keep_extension && dot > 0) {
        Some(dot) => format!("{} ({id}){}", &name[..dot], &name[dot..]),
        None => format!("{name} ({id})"),
    }
}

impl Session {
    async fn get_file(&self, id: &str) -> Result<DriveFile, ConnectorError> {
        let resp = self
            .client
            .get(format!("{}/files/{}", self.api_base, urlencoding::encode(id)))
            .bearer_auth(&self.token)
            .query(&[("fields", "id,name,mimeType"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>, ConnectorError> {
        let query = format!("'{folder_id}' in parents and trashed = false");
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(format!("{}/files", self.api_base))
                .bearer_auth(&self.token)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "nextPageToken,files(id,name,mimeType)"),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: FileList = check_status(request.send().await?).await?.json().await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl Connector for GoogleDriveConnector {
    async fn initialize(&mut self) -> Result<(), ConnectorError> {
        let key_path = self.key_path()?;
        let raw = tokio::fs::read_to_string(&key_path).await.map_err(|e| {
            ConnectorError::InvalidConfig(format!(
                "cannot read service account key {}: {e}",
                key_path.display()
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| ConnectorError::InvalidConfig(format!("malformed service account key: {e}")))?;

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: DRIVE_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ConnectorError::Auth(format!("invalid service account private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| ConnectorError::Auth(format!("failed to sign token request: {e}")))?;

        let client = http_client(USER_AGENT)?;
        let resp = client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = check_status(resp)
            .await
            .map_err(|e| ConnectorError::Auth(format!("token exchange failed: {e}")))?
            .json()
            .await?;

        info!(account = %key.client_email, drive_id = %self.source.drive_id, "Google Drive session ready");
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
            .ok_or_else(|| ConnectorError::InvalidConfig("google drive connector used before initialize".into()))?;

        let root = session.get_file(&self.source.drive_id).await?;
        let mut handles = Vec::new();
        if root.mime_type != FOLDER_MIME {
            if let Some(entry) = Listed::from_drive(root) {
                handles.extend(self.handle_for(session, entry, ""));
            }
            info!(count = handles.len(), "Listed drive file");
            return Ok(handles);
        }

        // (folder id, identity prefix)
        let mut pending = vec![(root.id, String::new())];
        while let Some((folder_id, prefix)) = pending.pop() {
            let children = session.list_children(&folder_id).await?;
            debug!(folder = %folder_id, children = children.len(), "Listed folder");
            let mut entries: Vec<Listed> = children.into_iter().filter_map(Listed::from_drive).collect();
            disambiguate(&mut entries);
            for entry in entries {
                match entry {
                    Listed::Folder { id, name } => {
                        if self.source.recursive {
                            pending.push((id, format!("{prefix}{name}/")));
                        }
                    }
                    file => handles.extend(self.handle_for(session, file, &prefix)),
                }
            }
        }

        info!(drive_id = %self.source.drive_id, count = handles.len(), "Listed drive files");
        Ok(handles)
    }

    fn release(&mut self) {
        self.session = None;
        release_downloads("google_drive", &self.download);
    }
}

enum Fetch {
    Media,
    Export(&'static str),
}

struct DriveDocument {
    session: Session,
    file_id: String,
    fetch: Fetch,
}

#[async_trait]
impl RemoteDocument for DriveDocument {
    async fn download(&self, dest: &Path) -> Result<(), ConnectorError> {
        let id = urlencoding::encode(&self.file_id);
        let request = match self.fetch {
            Fetch::Media => self
                .session
                .client
                .get(format!("{}/files/{id}", self.session.api_base))
                .query(&[("alt", "media"), ("supportsAllDrives", "true")]),
            Fetch::Export(mime) => self
                .session
                .client
                .get(format!("{}/files/{id}/export", self.session.api_base))
                .query(&[("mimeType", mime)]),
        };
        let resp = request.bearer_auth(&self.session.token).send().await?;
        stream_to_file(check_status(resp).await?, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_documents_export_to_text() {
        assert_eq!(
            export_format("application/vnd.google-apps.document"),
            Some(("text/plain", ".txt"))
        );
        assert_eq!(
            export_format("application/vnd.google-apps.spreadsheet"),
            Some(("text/csv", ".csv"))
        );
        assert_eq!(export_format("application/vnd.google-apps.form"), None);
        assert!(is_google_native("application/vnd.google-apps.form"));
        assert!(!is_google_native("application/pdf"));
    }

    fn file(id: &str, name: &str) -> Listed {
        Listed::File {
            id: id.into(),
            name: name.into(),
            fetch: Fetch::Media,
        }
    }

    fn names(entries: &mut [Listed]) -> Vec<String> {
        entries.iter_mut().map(|e| e.name_mut().clone()).collect()
    }

    #[test]
    fn repeated_names_get_their_file_id() {
        let mut entries = vec![
            file("id1", "report.txt"),
            file("id2", "report.txt"),
            file("id3", "notes.txt"),
            Listed::Folder {
                id: "f1".into(),
                name: "drafts".into(),
            },
            Listed::Folder {
                id: "f2".into(),
                name: "drafts".into(),
            },
        ];
        disambiguate(&mut entries);
        assert_eq!(
            names(&mut entries),
            vec![
                "report (id1).txt",
                "report (id2).txt",
                "notes.txt",
                "drafts (f1)",
                "drafts (f2)",
            ]
        );
    }

    #[test]
    fn exported_name_colliding_with_a_real_file_is_disambiguated() {
        let native = DriveFile {
            id: "doc1".into(),
            name: "minutes".into(),
            mime_type: "application/vnd.google-apps.document".into(),
        };
        let mut entries = vec![
            Listed::from_drive(native).unwrap(),
            file("bin1", "minutes.txt"),
        ];
        disambiguate(&mut entries);
        assert_eq!(
            names(&mut entries),
            vec!["minutes (doc1).txt", "minutes (bin1).txt"]
        );
    }

    #[test]
    fn ids_go_before_the_extension_only_for_files() {
        assert_eq!(with_id("a.tar.gz", "x", true), "a.tar (x).gz");
        assert_eq!(with_id(".env", "x", true), ".env (x)");
        assert_eq!(with_id("Makefile", "x", true), "Makefile (x)");
        assert_eq!(with_id("v1.2", "x", false), "v1.2 (x)");
    }

    #[test]
    fn extension_filter_ignores_dot_and_case() {
        assert!(has_extension("report.DOCX", ".docx"));
        assert!(has_extension("report.docx", "docx"));
        assert!(!has_extension("report.pdf", ".docx"));
        assert!(!has_extension("README", ".docx"));
    }
}
