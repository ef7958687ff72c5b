use std::process::ExitCode;

use clap::Parser;
use doc_ingest::cli::{run, Cli};
use tracing_subscriber::EnvFilter;

/// Exit code for a run interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!("Tracing initialised, environment loaded");

    tokio::select! {
        result = run(cli) => match result {
            Ok(report) => {
                if report.failed.is_empty() {
                    tracing::info!("doc-ingest completed successfully");
                } else {
                    tracing::warn!(
                        failed = report.failed.len(),
                        "doc-ingest completed with failed documents"
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "doc-ingest exited with error");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, in-flight documents were aborted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
