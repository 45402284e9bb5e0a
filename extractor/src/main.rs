mod blur;
mod filter;
mod pipeline;
mod preprocess;
mod selector;
mod storage;

use framekeep_common::config::Config;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = %config.source.path.display(),
        batch = config.source.batch,
        metric = ?config.selector.metric,
        min_spacing = config.selector.min_spacing,
        blur_threshold = config.selector.blur_threshold,
        output = %config.output.dir.display(),
        "starting framekeep extractor"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current frame");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    // Decoding and image maths are blocking work.
    let result = tokio::task::spawn_blocking(move || pipeline::run(&config, &cancel)).await;

    match result {
        Ok(Ok(reports)) => {
            let kept: u64 = reports.iter().map(|r| r.kept).sum();
            let processed: u64 = reports.iter().map(|r| r.processed).sum();
            let rejected: u64 = reports.iter().map(|r| r.rejected()).sum();
            info!(
                streams = reports.len(),
                processed,
                kept,
                rejected,
                "all extraction done"
            );
        }
        Ok(Err(e)) => {
            error!(error = %e, "extraction failed");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "extraction task panicked");
            std::process::exit(1);
        }
    }
}
