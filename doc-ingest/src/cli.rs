//! Command-line surface of `doc-ingest`.
//!
//! Exactly one source selector (`--s3-url`, `--github-url`, `--gitlab-url`,
//! `--subreddit-name`, `--wikipedia-page-title`, `--drive-id` or `--config`)
//! must be given; clap rejects zero or several before anything runs. The
//! remaining flags are per-source options and the shared download, output
//! and pool settings. All pipeline logic lives in `doc-ingest-core`; this
//! module only turns flags into a [`SourceConfig`] and starts a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser};
use doc_ingest_core::config::{
    GitHubSource, GitLabSource, GoogleDriveSource, RedditSource, S3Source, WikipediaSource,
    DEFAULT_REDDIT_NUM_POSTS, DEFAULT_REDDIT_USER_AGENT,
};
use doc_ingest_core::fingerprint::default_download_dir;
use doc_ingest_core::orchestrator::DEFAULT_NUM_PROCESSES;
use doc_ingest_core::{
    build_connector, DownloadConfig, IngestError, Orchestrator, RunOptions, RunReport, SourceAction,
    SourceConfig, TextPartitioner,
};
use tracing::{info, warn};

use crate::load_config::load_config;

/// Cache root below the home directory for default download directories.
pub const CACHE_SUBDIR: &str = ".cache/doc-ingest/ingest";

/// Fetch documents from one source and write structured JSON for each.
#[derive(Parser, Debug, Clone)]
#[command(name = "doc-ingest", version)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .multiple(false)
        .args([
            "s3_url",
            "github_url",
            "gitlab_url",
            "subreddit_name",
            "wikipedia_page_title",
            "drive_id",
            "config",
        ])
))]
pub struct Cli {
    /// Prefix of objects to ingest, e.g. s3://bucket/prefix/
    #[arg(long)]
    pub s3_url: Option<String>,
    /// Access the bucket without credentials
    #[arg(long)]
    pub s3_anonymous: bool,
    /// Custom endpoint for S3-compatible object stores
    #[arg(long)]
    pub s3_endpoint: Option<String>,
    /// Region of the bucket; otherwise taken from the AWS environment
    #[arg(long, env = "AWS_REGION")]
    pub s3_region: Option<String>,

    /// GitHub repository, e.g. https://github.com/owner/repo
    #[arg(long)]
    pub github_url: Option<String>,
    /// GitLab project, e.g. https://gitlab.com/group/project
    #[arg(long)]
    pub gitlab_url: Option<String>,
    #[arg(long, env = "GIT_ACCESS_TOKEN", hide_env_values = true)]
    pub git_access_token: Option<String>,
    /// Branch to read; defaults to the repository's default branch
    #[arg(long)]
    pub git_branch: Option<String>,
    /// Comma-separated globs of files to keep, e.g. "*.md,*.txt"
    #[arg(long)]
    pub git_file_glob: Option<String>,

    #[arg(long)]
    pub subreddit_name: Option<String>,
    #[arg(long, env = "REDDIT_CLIENT_ID", hide_env_values = true)]
    pub reddit_client_id: Option<String>,
    #[arg(long, env = "REDDIT_CLIENT_SECRET", hide_env_values = true)]
    pub reddit_client_secret: Option<String>,
    #[arg(long, default_value = DEFAULT_REDDIT_USER_AGENT)]
    pub reddit_user_agent: String,
    /// Ingest posts matching this query instead of hot posts
    #[arg(long)]
    pub reddit_search_query: Option<String>,
    #[arg(long, default_value_t = DEFAULT_REDDIT_NUM_POSTS)]
    pub reddit_num_posts: usize,

    #[arg(long)]
    pub wikipedia_page_title: Option<String>,
    /// Resolve the title through search when it does not match exactly
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub wikipedia_auto_suggest: bool,

    /// Id of a Google Drive file or folder
    #[arg(long)]
    pub drive_id: Option<String>,
    /// Service account JSON key
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub drive_service_account_key: Option<PathBuf>,
    /// Descend into sub-folders
    #[arg(long)]
    pub drive_recursive: bool,
    /// Only files with this extension, e.g. .docx
    #[arg(long)]
    pub drive_extension: Option<String>,

    /// YAML file with a tagged `source:` section
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to put local copies; defaults to a per-source cache directory
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Keep local copies after processing
    #[arg(long)]
    pub preserve_downloads: bool,
    #[arg(long, default_value = "structured-output")]
    pub structured_output_dir: PathBuf,
    /// Process documents even when their structured output exists
    #[arg(long)]
    pub reprocess: bool,
    /// Download documents even when a local copy exists
    #[arg(long)]
    pub re_download: bool,
    #[arg(long, default_value_t = DEFAULT_NUM_PROCESSES)]
    pub num_processes: usize,
    /// Fail a single document after this many seconds
    #[arg(long)]
    pub item_timeout_secs: Option<u64>,
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// The source selected by flags. `None` when `--config` is the selector.
    pub fn source_action(&self) -> Option<SourceAction> {
        if let Some(url) = &self.s3_url {
            return Some(SourceAction::S3(S3Source {
                url: url.clone(),
                anonymous: self.s3_anonymous,
                endpoint: self.s3_endpoint.clone(),
                region: self.s3_region.clone(),
            }));
        }
        if let Some(url) = &self.github_url {
            return Some(SourceAction::GitHub(GitHubSource {
                url: url.clone(),
                access_token: self.git_access_token.clone(),
                branch: self.git_branch.clone(),
                file_glob: self.git_file_glob.clone(),
                api_base: None,
            }));
        }
        if let Some(url) = &self.gitlab_url {
            return Some(SourceAction::GitLab(GitLabSource {
                url: url.clone(),
                access_token: self.git_access_token.clone(),
                branch: self.git_branch.clone(),
                file_glob: self.git_file_glob.clone(),
            }));
        }
        if let Some(name) = &self.subreddit_name {
            return Some(SourceAction::Reddit(RedditSource {
                subreddit_name: name.clone(),
                client_id: self.reddit_client_id.clone(),
                client_secret: self.reddit_client_secret.clone(),
                user_agent: self.reddit_user_agent.clone(),
                search_query: self.reddit_search_query.clone(),
                num_posts: self.reddit_num_posts,
                auth_base: None,
                api_base: None,
            }));
        }
        if let Some(title) = &self.wikipedia_page_title {
            return Some(SourceAction::Wikipedia(WikipediaSource {
                page_title: title.clone(),
                auto_suggest: self.wikipedia_auto_suggest,
                api_base: None,
            }));
        }
        if let Some(id) = &self.drive_id {
            return Some(SourceAction::GoogleDrive(GoogleDriveSource {
                drive_id: id.clone(),
                service_account_key: self.drive_service_account_key.clone(),
                recursive: self.drive_recursive,
                extension: self.drive_extension.clone(),
                api_base: None,
            }));
        }
        None
    }

    /// Builds the full run configuration, reading `--config` if given.
    pub fn source_config(&self) -> Result<SourceConfig> {
        let (source, file_download_dir) = match &self.config {
            Some(path) => {
                let file = load_config(path)?;
                (file.source, file.download_dir)
            }
            None => (
                self.source_action().ok_or_else(|| {
                    IngestError::Configuration("no source selector given".into())
                })?,
                None,
            ),
        };

        let explicit_dir = self.download_dir.clone().or(file_download_dir);
        let download_dir = resolve_download_dir(
            explicit_dir,
            self.preserve_downloads,
            &source.identity(),
            &cache_root()?,
        );

        Ok(SourceConfig {
            source,
            download: DownloadConfig {
                download_dir,
                output_dir: self.structured_output_dir.clone(),
                re_download: self.re_download,
                preserve_downloads: self.preserve_downloads,
            },
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            num_processes: self.num_processes,
            reprocess: self.reprocess,
            item_timeout: self.item_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn cache_root() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(CACHE_SUBDIR))
        .context("cannot determine the home directory for the download cache")
}

/// The explicit download directory if given, otherwise the fingerprinted
/// cache directory for this source. Warns about combinations that are
/// probably mistakes.
pub fn resolve_download_dir(
    explicit: Option<PathBuf>,
    preserve_downloads: bool,
    identity: &str,
    cache_root: &Path,
) -> PathBuf {
    match explicit {
        Some(dir) => {
            if !preserve_downloads {
                warn!(
                    download_dir = %dir.display(),
                    "Not preserving downloaded files but --download-dir is specified"
                );
            }
            dir
        }
        None => {
            let dir = default_download_dir(cache_root, identity);
            if preserve_downloads {
                warn!(
                    download_dir = %dir.display(),
                    "Preserving downloaded files but --download-dir is not specified, using {}",
                    dir.display()
                );
            }
            dir
        }
    }
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<RunReport> {
    let config = cli.source_config()?;
    config.trace_loaded();

    let connector = build_connector(&config);
    let orchestrator = Orchestrator::new(cli.run_options(), Arc::new(TextPartitioner::new()));
    let report = orchestrator
        .run(connector)
        .await
        .with_context(|| format!("{} ingest failed", config.source.kind()))?;

    info!(
        total = report.total,
        skipped = report.skipped,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        output_dir = %config.download.output_dir.display(),
        "Ingest complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("doc-ingest").chain(args.iter().copied()))
    }

    #[test]
    fn one_selector_is_required() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn selectors_are_mutually_exclusive() {
        let err = parse(&["--s3-url", "s3://a/", "--drive-id", "x"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&["--wikipedia-page-title", "Open source software"]).unwrap();
        assert_eq!(cli.num_processes, 2);
        assert_eq!(cli.structured_output_dir, PathBuf::from("structured-output"));
        assert!(cli.wikipedia_auto_suggest);
        assert!(!cli.reprocess);
        assert!(cli.run_options().item_timeout.is_none());

        let cli = parse(&[
            "--wikipedia-page-title",
            "Rust",
            "--wikipedia-auto-suggest",
            "false",
            "--item-timeout-secs",
            "30",
        ])
        .unwrap();
        assert!(!cli.wikipedia_auto_suggest);
        assert_eq!(cli.run_options().item_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn git_flags_build_a_github_source() {
        let cli = parse(&[
            "--github-url",
            "https://github.com/Unstructured-IO/unstructured",
            "--git-branch",
            "main",
            "--git-file-glob",
            "*.md",
        ])
        .unwrap();
        match cli.source_action() {
            Some(SourceAction::GitHub(g)) => {
                assert_eq!(g.branch.as_deref(), Some("main"));
                assert_eq!(g.file_glob.as_deref(), Some("*.md"));
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn download_dir_defaults_to_fingerprinted_cache() {
        let root = Path::new("/home/u/.cache/doc-ingest/ingest");
        assert_eq!(
            resolve_download_dir(None, false, "machinelearning", root),
            root.join("8ed6242658")
        );
        assert_eq!(
            resolve_download_dir(Some(PathBuf::from("/tmp/dl")), false, "machinelearning", root),
            PathBuf::from("/tmp/dl")
        );
    }
}
