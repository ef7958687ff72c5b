use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Everything one run needs to know about where documents come from and
/// where their copies and outputs go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source: SourceAction,
    pub download: DownloadConfig,
}

impl SourceConfig {
    pub fn trace_loaded(&self) {
        info!(
            source = self.source.kind(),
            identity = %self.source.identity(),
            download_dir = %self.download.download_dir.display(),
            output_dir = %self.download.output_dir.display(),
            re_download = self.download.re_download,
            preserve_downloads = self.download.preserve_downloads,
            "Loaded source config"
        );
        debug!(?self, "Source config loaded (full debug)");
    }
}

/// Options shared by every source kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Where local copies of remote documents are written.
    pub download_dir: PathBuf,
    /// Where structured `.json` outputs are written.
    pub output_dir: PathBuf,
    /// Download again even if a local copy already exists.
    #[serde(default)]
    pub re_download: bool,
    /// Keep local copies after processing.
    #[serde(default)]
    pub preserve_downloads: bool,
}

impl DownloadConfig {
    /// Download and output paths for a document identity.
    ///
    /// Pure function of the identity and the two directories, which is what
    /// lets a later run detect existing outputs without any bookkeeping.
    pub fn paths_for(&self, identity: &str) -> (PathBuf, PathBuf) {
        let relative = relative_path(identity);
        let download_path = self.download_dir.join(&relative);
        let mut output_name = relative.into_os_string();
        output_name.push(".json");
        let output_path = self.output_dir.join(output_name);
        (download_path, output_path)
    }
}

/// Normalises an identity into a relative path that cannot escape its root:
/// empty, `.` and `..` segments are dropped, as are root and prefix components.
pub fn relative_path(identity: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for segment in identity.split(|c| c == '/' || c == '\\') {
        for component in Path::new(segment).components() {
            if let Component::Normal(part) = component {
                out.push(part);
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push("unnamed");
    }
    out
}

/// Selects the source kind for a run. Exactly one is active per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceAction {
    S3(S3Source),
    GitHub(GitHubSource),
    GitLab(GitLabSource),
    Reddit(RedditSource),
    Wikipedia(WikipediaSource),
    #[serde(rename = "google_drive")]
    GoogleDrive(GoogleDriveSource),
}

impl SourceAction {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceAction::S3(_) => "s3",
            SourceAction::GitHub(_) => "github",
            SourceAction::GitLab(_) => "gitlab",
            SourceAction::Reddit(_) => "reddit",
            SourceAction::Wikipedia(_) => "wikipedia",
            SourceAction::GoogleDrive(_) => "google_drive",
        }
    }

    /// The string the default cache directory is fingerprinted from.
    pub fn identity(&self) -> String {
        match self {
            SourceAction::S3(s) => s.url.clone(),
            SourceAction::GitHub(g) => git_identity(&g.url, g.branch.as_deref()),
            SourceAction::GitLab(g) => git_identity(&g.url, g.branch.as_deref()),
            SourceAction::Reddit(r) => r.subreddit_name.clone(),
            SourceAction::Wikipedia(w) => w.page_title.clone(),
            SourceAction::GoogleDrive(d) => d.drive_id.clone(),
        }
    }
}

fn git_identity(url: &str, branch: Option<&str>) -> String {
    format!("{}_{}", url, branch.unwrap_or("default"))
}

/// Objects under an `s3://bucket/prefix` URL (or a single object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Source {
    pub url: String,
    /// Skip request signing; for public buckets.
    #[serde(default)]
    pub anonymous: bool,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Skips region discovery when set.
    #[serde(default)]
    pub region: Option<String>,
}

/// Files of a GitHub repository at one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSource {
    /// `https://github.com/owner/repo` or `owner/repo`.
    pub url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Defaults to the repository's default branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// Comma-separated globs, e.g. `*.md,*.txt`.
    #[serde(default)]
    pub file_glob: Option<String>,
    /// REST API root, for GitHub Enterprise.
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Files of a GitLab project at one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabSource {
    /// `https://gitlab.com/group/project` or `group/project`.
    pub url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub file_glob: Option<String>,
}

/// Posts of one subreddit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditSource {
    pub subreddit_name: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// When set, posts matching this query; otherwise hot posts.
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default = "default_num_posts")]
    pub num_posts: usize,
    #[serde(default)]
    pub auth_base: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

pub const DEFAULT_REDDIT_USER_AGENT: &str = "doc-ingest subreddit fetcher";
pub const DEFAULT_REDDIT_NUM_POSTS: usize = 10;

fn default_user_agent() -> String {
    DEFAULT_REDDIT_USER_AGENT.to_string()
}

fn default_num_posts() -> usize {
    DEFAULT_REDDIT_NUM_POSTS
}

/// One Wikipedia article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikipediaSource {
    pub page_title: String,
    /// Resolve the title through search when it does not match exactly.
    #[serde(default = "default_true")]
    pub auto_suggest: bool,
    /// Site root, e.g. `https://en.wikipedia.org`.
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A Google Drive file or folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveSource {
    pub drive_id: String,
    /// Service account JSON key. Falls back to `GOOGLE_APPLICATION_CREDENTIALS`.
    #[serde(default)]
    pub service_account_key: Option<PathBuf>,
    /// Descend into sub-folders.
    #[serde(default)]
    pub recursive: bool,
    /// Only files with this extension, e.g. `.docx`.
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}
