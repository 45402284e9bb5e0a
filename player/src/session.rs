use framekeep_common::config::PlaybackConfig;
use framekeep_common::source::FrameSource;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::controller::{PlaybackController, PlaybackError};
use crate::display::{self, frame_interval, DisplaySink, LoopExit, PlayerCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub exit: LoopExit,
    pub displayed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Plays `source` into `sink` until the operator quits or the stream ends.
///
/// Owns its runtime so shutdown is bounded: a producer stuck in a read is
/// abandoned after `stop_timeout` instead of holding the process open.
/// `interrupt`, when given, receives `Quit` on Ctrl-C.
pub fn run_session(
    source: Box<dyn FrameSource>,
    config: &PlaybackConfig,
    sink: &mut dyn DisplaySink,
    commands: flume::Receiver<PlayerCommand>,
    interrupt: Option<flume::Sender<PlayerCommand>>,
) -> Result<SessionOutcome, SessionError> {
    let runtime = Runtime::new()?;

    let result = runtime.block_on(async {
        if let Some(tx) = interrupt {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping playback");
                    let _ = tx.send_async(PlayerCommand::Quit).await;
                }
            });
        }

        let mut controller = PlaybackController::new(source, config.clone());
        controller.start()?;

        let period = frame_interval(config.realtime, config.target_fps, controller.frame_rate());
        info!(period = ?period, "display loop running");

        let exit = display::run_display_loop(&mut controller, sink, commands, period).await;
        controller.stop().await;
        Ok::<_, SessionError>(SessionOutcome {
            exit,
            displayed: controller.displayed(),
        })
    });

    runtime.shutdown_timeout(config.stop_timeout());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_common::frame::{Frame, PixelFormat};
    use framekeep_common::source::{SeekOutcome, SourceError};
    use std::io::{BufRead, Read};
    use std::time::{Duration, Instant};

    use crate::display::LogDisplay;
    use crate::input;

    /// Endless 1x1 frames; every read sleeps for `delay`.
    struct Slow {
        next: u64,
        delay: Duration,
    }

    impl FrameSource for Slow {
        fn read(&mut self) -> Result<Option<Frame>, SourceError> {
            std::thread::sleep(self.delay);
            let seq = self.next;
            self.next += 1;
            let frame = Frame::new(seq, 1, 1, PixelFormat::Gray8, vec![0]).map_err(|e| {
                SourceError::Decode {
                    seq,
                    reason: e.to_string(),
                }
            })?;
            Ok(Some(frame))
        }

        fn seek(&mut self, _offset: Duration) -> Result<SeekOutcome, SourceError> {
            Err(SourceError::SeekUnsupported("slow".into()))
        }
    }

    /// Yields one line, then blocks forever like an idle terminal.
    struct HangAfter {
        line: Option<&'static [u8]>,
    }

    impl Read for HangAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.line.take() {
                Some(line) => {
                    buf[..line.len()].copy_from_slice(line);
                    Ok(line.len())
                }
                None => loop {
                    std::thread::park();
                },
            }
        }
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            stop_timeout_ms: 50,
            ..PlaybackConfig::default()
        }
    }

    fn hanging_input(line: &'static [u8]) -> impl BufRead + Send + 'static {
        std::io::BufReader::new(HangAfter { line: Some(line) })
    }

    #[test]
    fn quit_returns_while_input_is_still_open() {
        let (tx, rx) = flume::unbounded();
        input::spawn_reader(hanging_input(b"q\n"), tx).unwrap();

        let started = Instant::now();
        let outcome = run_session(
            Box::new(Slow {
                next: 0,
                delay: Duration::from_millis(1),
            }),
            &config(),
            &mut LogDisplay,
            rx,
            None,
        )
        .unwrap();

        assert_eq!(outcome.exit, LoopExit::Quit);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn stuck_producer_does_not_hold_shutdown() {
        let (tx, rx) = flume::unbounded();
        tx.send(PlayerCommand::Quit).unwrap();

        let started = Instant::now();
        let outcome = run_session(
            Box::new(Slow {
                next: 0,
                delay: Duration::from_secs(5),
            }),
            &config(),
            &mut LogDisplay,
            rx,
            None,
        )
        .unwrap();

        assert_eq!(outcome.exit, LoopExit::Quit);
        assert_eq!(outcome.displayed, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
