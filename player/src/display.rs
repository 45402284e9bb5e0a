use framekeep_common::frame::Frame;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::controller::{PlaybackController, StreamHealth};

/// Fallback pacing when neither the config nor the source gives a frame rate.
const DEFAULT_FPS: f64 = 30.0;
/// Poll period when pacing is off and frames are shown as they arrive.
const UNPACED_POLL: Duration = Duration::from_millis(1);
/// Log a progress line every this many frames.
const PROGRESS_EVERY: u64 = 100;

/// Metadata drawn alongside a displayed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Frames shown since playback started.
    pub frame_counter: u64,
    pub position: Option<Duration>,
    pub buffered: usize,
    pub capacity: usize,
}

/// Where display-ready frames go. Called at most once per consumer tick.
pub trait DisplaySink: Send {
    fn show(&mut self, frame: &Frame, overlay: &Overlay);
}

/// Headless sink that reports frames through tracing.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn show(&mut self, frame: &Frame, overlay: &Overlay) {
        debug!(
            seq = frame.seq(),
            counter = overlay.frame_counter,
            position = ?overlay.position,
            buffered = overlay.buffered,
            "frame"
        );
        if overlay.frame_counter % PROGRESS_EVERY == 0 {
            info!(
                counter = overlay.frame_counter,
                position = ?overlay.position,
                buffered = overlay.buffered,
                capacity = overlay.capacity,
                "playing"
            );
        }
    }
}

/// Operator commands consumed by the display loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    TogglePause,
    Pause,
    Resume,
    /// Jump to a slider step in `0..=seek_steps`.
    Seek(u32),
    Quit,
}

/// Why the display loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Quit,
    Ended,
    Failed(String),
}

/// Display pacing: the configured target, else the source rate, else 30 fps.
/// `None` when real-time pacing is disabled.
pub fn frame_interval(realtime: bool, target_fps: Option<f64>, source_fps: Option<f64>) -> Option<Duration> {
    if !realtime {
        return None;
    }
    let fps = target_fps
        .or(source_fps)
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(DEFAULT_FPS);
    Some(Duration::from_secs_f64(1.0 / fps).max(Duration::from_micros(1)))
}

/// Consumer loop: one display attempt per tick, commands handled between ticks.
///
/// Returns when the operator quits, or once the stream has ended or failed
/// and every buffered frame has been shown.
pub async fn run_display_loop(
    controller: &mut PlaybackController,
    sink: &mut dyn DisplaySink,
    commands: flume::Receiver<PlayerCommand>,
    period: Option<Duration>,
) -> LoopExit {
    let mut ticker = tokio::time::interval(period.unwrap_or(UNPACED_POLL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stalled = false;

    loop {
        tokio::select! {
            command = commands.recv_async() => {
                let Ok(command) = command else {
                    // Every command sender is gone; keep playing without input.
                    return finish_without_input(controller, sink, &mut ticker).await;
                };
                if let Some(exit) = handle_command(controller, command).await {
                    return exit;
                }
            }
            _ = ticker.tick() => {
                if let Some(exit) = tick(controller, sink, &mut stalled) {
                    return exit;
                }
            }
        }
    }
}

async fn finish_without_input(
    controller: &mut PlaybackController,
    sink: &mut dyn DisplaySink,
    ticker: &mut tokio::time::Interval,
) -> LoopExit {
    let mut stalled = false;
    loop {
        ticker.tick().await;
        if let Some(exit) = tick(controller, sink, &mut stalled) {
            return exit;
        }
    }
}

async fn handle_command(
    controller: &mut PlaybackController,
    command: PlayerCommand,
) -> Option<LoopExit> {
    debug!(?command, "player command");
    match command {
        PlayerCommand::TogglePause => controller.toggle_pause(),
        PlayerCommand::Pause => controller.pause(),
        PlayerCommand::Resume => controller.resume(),
        PlayerCommand::Seek(step) => {
            let target = controller.position_for_step(step);
            if let Err(e) = controller.seek(target).await {
                warn!(step, error = %e, "seek command failed");
            }
        }
        PlayerCommand::Quit => {
            info!("quit requested");
            return Some(LoopExit::Quit);
        }
    }
    None
}

fn tick(
    controller: &mut PlaybackController,
    sink: &mut dyn DisplaySink,
    stalled: &mut bool,
) -> Option<LoopExit> {
    if let Some(frame) = controller.next_display_frame() {
        *stalled = false;
        let overlay = Overlay {
            frame_counter: controller.displayed(),
            position: controller.position(),
            buffered: controller.buffered(),
            capacity: controller.capacity(),
        };
        sink.show(&frame, &overlay);
        return None;
    }

    match controller.health() {
        StreamHealth::Streaming => *stalled = false,
        StreamHealth::Stalled => {
            if !*stalled {
                warn!(position = ?controller.position(), "source stalled");
                *stalled = true;
            }
        }
        StreamHealth::Ended => {
            info!(displayed = controller.displayed(), "stream ended");
            return Some(LoopExit::Ended);
        }
        StreamHealth::Failed(reason) => {
            warn!(reason = %reason, "stream ended after source failure");
            return Some(LoopExit::Failed(reason));
        }
    }
    None
}
