use framekeep_common::config::Config;
use framekeep_common::source::open_source;
use framekeep_player::display::{LogDisplay, LoopExit};
use framekeep_player::input;
use framekeep_player::session::run_session;
use std::path::PathBuf;
use tracing::{error, info, warn};

fn main() {
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
        buffer = config.playback.buffer_capacity,
        overflow = ?config.playback.overflow,
        realtime = config.playback.realtime,
        "starting framekeep player"
    );

    let source = match open_source(&config.source.path, config.source.fps) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open source");
            std::process::exit(1);
        }
    };

    let (tx, rx) = flume::unbounded();
    if let Err(e) = input::spawn_stdin_reader(tx.clone()) {
        warn!(error = %e, "failed to start input reader, controls disabled");
    }
    info!(
        "controls: p toggle pause, s <0-{}> seek, q quit",
        config.playback.seek_steps
    );

    let outcome = match run_session(source, &config.playback, &mut LogDisplay, rx, Some(tx)) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "playback failed");
            std::process::exit(1);
        }
    };

    match outcome.exit {
        LoopExit::Quit | LoopExit::Ended => {
            info!(displayed = outcome.displayed, exit = ?outcome.exit, "player exiting");
        }
        LoopExit::Failed(reason) => {
            error!(reason = %reason, "playback ended with a source failure");
            std::process::exit(1);
        }
    }
}
