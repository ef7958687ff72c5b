//! `load_config`: reads a YAML run description for `--config`.
//!
//! The file carries one tagged `source:` section, the same shape as
//! [`SourceAction`] in the core crate, and optionally a `download_dir`.
//! Secrets are not expected in the file; when a field is left empty it is
//! filled from the environment (`GIT_ACCESS_TOKEN`, `REDDIT_CLIENT_ID`,
//! `REDDIT_CLIENT_SECRET`). Google Drive keys fall back to
//! `GOOGLE_APPLICATION_CREDENTIALS` inside the connector itself.
//!
//! ```yaml
//! source:
//!   type: github
//!   url: https://github.com/Unstructured-IO/unstructured
//!   branch: main
//!   file_glob: "*.md,*.txt"
//! download_dir: /tmp/unstructured-docs
//! ```

use anyhow::{anyhow, Result};
use doc_ingest_core::SourceAction;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub source: SourceAction,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let mut config: FileConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML: {e}")
    })?;

    inject_env_secrets(&mut config.source);
    info!(
        config_path = ?path_ref,
        source = config.source.kind(),
        "Parsed config YAML successfully"
    );
    Ok(config)
}

fn env_secret(name: &str) -> Option<String> {
    let value = std::env::var(name).ok().filter(|v| !v.is_empty());
    if value.is_some() {
        debug!(var = name, "Using secret from environment");
    }
    value
}

fn inject_env_secrets(source: &mut SourceAction) {
    match source {
        SourceAction::GitHub(g) if g.access_token.is_none() => {
            g.access_token = env_secret("GIT_ACCESS_TOKEN");
        }
        SourceAction::GitLab(g) if g.access_token.is_none() => {
            g.access_token = env_secret("GIT_ACCESS_TOKEN");
        }
        SourceAction::Reddit(r) => {
            if r.client_id.is_none() {
                r.client_id = env_secret("REDDIT_CLIENT_ID");
            }
            if r.client_secret.is_none() {
                r.client_secret = env_secret("REDDIT_CLIENT_SECRET");
            }
        }
        _ => {}
    }
}
