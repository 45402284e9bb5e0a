use framekeep_common::config::PlaybackConfig;
use framekeep_common::frame::Frame;
use framekeep_common::source::{FrameSource, SeekOutcome, SourceError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::{FrameBuffer, Popped, PushOutcome};

/// How long an idle producer waits for a command before re-checking for cancellation.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Created, producer not started.
    Idle,
    Running,
    Paused,
    /// A seek is in flight; the prior state is restored once it completes.
    Seeking,
    /// Final.
    Stopped,
}

/// Condition of the stream as seen from the consumer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamHealth {
    Streaming,
    /// The producer is alive but has delivered nothing for longer than the stall timeout.
    Stalled,
    /// End of stream reached and the buffer is drained.
    Ended,
    /// The source failed and the buffer is drained; carries the reason.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("playback has not been started")]
    NotStarted,
    #[error("playback was already started")]
    AlreadyStarted,
    #[error("playback is stopped")]
    Stopped,
    #[error("producer task is no longer running")]
    ProducerGone,
    #[error("source did not confirm seek within {0:?}")]
    SeekTimeout(Duration),
    #[error(transparent)]
    Source(#[from] SourceError),
}

enum ProducerCommand {
    Seek {
        target: Duration,
        reply: oneshot::Sender<Result<SeekOutcome, SourceError>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProducerStatus {
    Running,
    Ended,
    Failed(String),
}

/// State shared between the controller and its producer thread.
struct ProducerShared {
    cancel: AtomicBool,
    status: Mutex<ProducerStatus>,
    last_progress: Mutex<Instant>,
}

impl ProducerShared {
    fn touch(&self) {
        *self.last_progress.lock() = Instant::now();
    }

    fn set_status(&self, status: ProducerStatus) {
        *self.status.lock() = status;
    }
}

/// Decouples source read rate from display rate through a [`FrameBuffer`].
///
/// A blocking producer pulls frames from the source into the buffer; the
/// consumer takes them with [`next_display_frame`](Self::next_display_frame),
/// which never blocks. Seeks go to the producer over a command channel.
pub struct PlaybackController {
    config: PlaybackConfig,
    buffer: Arc<FrameBuffer>,
    shared: Arc<ProducerShared>,
    state: PlaybackState,
    source: Option<Box<dyn FrameSource>>,
    name: String,
    duration: Option<Duration>,
    frame_rate: Option<f64>,
    commands: Option<flume::Sender<ProducerCommand>>,
    producer: Option<JoinHandle<()>>,
    position: Option<Duration>,
    displayed: u64,
}

impl PlaybackController {
    pub fn new(source: Box<dyn FrameSource>, config: PlaybackConfig) -> Self {
        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity, config.overflow));
        Self {
            name: source.name().to_string(),
            duration: source.duration(),
            frame_rate: source.frame_rate(),
            source: Some(source),
            config,
            buffer,
            shared: Arc::new(ProducerShared {
                cancel: AtomicBool::new(false),
                status: Mutex::new(ProducerStatus::Running),
                last_progress: Mutex::new(Instant::now()),
            }),
            state: PlaybackState::Idle,
            commands: None,
            producer: None,
            position: None,
            displayed: 0,
        }
    }

    /// Launches the producer on the blocking pool and enters `Running`.
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        if self.state == PlaybackState::Stopped {
            return Err(PlaybackError::Stopped);
        }
        let Some(source) = self.source.take() else {
            return Err(PlaybackError::AlreadyStarted);
        };

        let (tx, rx) = flume::unbounded();
        let buffer = self.buffer.clone();
        let shared = self.shared.clone();
        shared.touch();
        self.producer = Some(tokio::task::spawn_blocking(move || {
            produce(source, buffer, shared, rx)
        }));
        self.commands = Some(tx);
        self.state = PlaybackState::Running;

        info!(
            source = self.name,
            capacity = self.buffer.capacity(),
            overflow = ?self.config.overflow,
            "playback started"
        );
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Running {
            self.state = PlaybackState::Paused;
            info!(position = ?self.position, "paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Running;
            info!(position = ?self.position, "resumed");
        }
    }

    pub fn toggle_pause(&mut self) {
        match self.state {
            PlaybackState::Running => self.pause(),
            PlaybackState::Paused => self.resume(),
            _ => {}
        }
    }

    /// Repositions the source and flushes the buffer.
    ///
    /// Once this returns `Ok`, no frame older than the landing position will
    /// be handed out. The prior running/paused state is restored either way.
    pub async fn seek(&mut self, target: Duration) -> Result<SeekOutcome, PlaybackError> {
        let prior = match self.state {
            PlaybackState::Running | PlaybackState::Paused => self.state,
            // Only reachable if an earlier seek future was dropped mid-flight.
            PlaybackState::Seeking => PlaybackState::Running,
            PlaybackState::Idle => return Err(PlaybackError::NotStarted),
            PlaybackState::Stopped => return Err(PlaybackError::Stopped),
        };
        let Some(commands) = &self.commands else {
            return Err(PlaybackError::NotStarted);
        };

        self.state = PlaybackState::Seeking;
        // Drop what is queued now; the producer clears again after repositioning.
        self.buffer.clear();

        let (reply_tx, reply_rx) = oneshot::channel();
        let result = if commands
            .send(ProducerCommand::Seek {
                target,
                reply: reply_tx,
            })
            .is_err()
        {
            Err(PlaybackError::ProducerGone)
        } else {
            match tokio::time::timeout(self.config.seek_timeout(), reply_rx).await {
                Ok(Ok(Ok(outcome))) => Ok(outcome),
                Ok(Ok(Err(e))) => Err(PlaybackError::Source(e)),
                Ok(Err(_)) => Err(PlaybackError::ProducerGone),
                Err(_) => Err(PlaybackError::SeekTimeout(self.config.seek_timeout())),
            }
        };

        self.state = prior;
        match &result {
            Ok(outcome) => {
                self.position = Some(outcome.position);
                info!(
                    requested = ?outcome.requested,
                    position = ?outcome.position,
                    clamped = outcome.clamped,
                    "seek complete"
                );
                if outcome.clamped {
                    warn!(requested = ?target, "seek target out of range, clamped to last frame");
                }
            }
            Err(e) => warn!(requested = ?target, error = %e, "seek failed"),
        }
        result
    }

    /// Maps a slider step onto a stream offset: `step / seek_steps` of the
    /// source duration, or of the configured approximate duration when the
    /// source cannot report one.
    pub fn position_for_step(&self, step: u32) -> Duration {
        let steps = self.config.seek_steps.max(1);
        let total = self
            .duration
            .unwrap_or_else(|| Duration::from_secs(self.config.approx_duration_secs));
        total.mul_f64(step.min(steps) as f64 / steps as f64)
    }

    /// The next frame to show, or `None` when paused, seeking, or the buffer
    /// is momentarily empty. Never blocks.
    pub fn next_display_frame(&mut self) -> Option<Frame> {
        if self.state != PlaybackState::Running {
            return None;
        }
        match self.buffer.try_pop() {
            Popped::Frame(frame) => {
                if let Some(ts) = frame.timestamp() {
                    self.position = Some(ts);
                }
                self.displayed += 1;
                Some(frame)
            }
            Popped::Empty | Popped::EndOfStream => None,
        }
    }

    pub fn health(&self) -> StreamHealth {
        let status = self.shared.status.lock().clone();
        match status {
            // Frames queued before the end are still shown.
            ProducerStatus::Failed(reason) if self.buffer.is_empty() => StreamHealth::Failed(reason),
            ProducerStatus::Ended if self.buffer.is_empty() => StreamHealth::Ended,
            ProducerStatus::Failed(_) | ProducerStatus::Ended => StreamHealth::Streaming,
            ProducerStatus::Running => {
                let idle = self.shared.last_progress.lock().elapsed();
                let producing = matches!(
                    self.state,
                    PlaybackState::Running | PlaybackState::Paused
                );
                if producing && self.buffer.is_empty() && idle > self.config.stall_timeout() {
                    StreamHealth::Stalled
                } else {
                    StreamHealth::Streaming
                }
            }
        }
    }

    /// Signals the producer, waits a bounded time for it, and releases the buffer.
    ///
    /// A producer stuck in an uninterruptible read is left to finish on its
    /// own; that is logged, not treated as an error.
    pub async fn stop(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        self.state = PlaybackState::Stopped;
        self.shared.cancel.store(true, Ordering::Relaxed);
        self.buffer.close();
        self.commands = None;

        if let Some(mut source) = self.source.take() {
            source.close();
        }

        if let Some(handle) = self.producer.take() {
            match tokio::time::timeout(self.config.stop_timeout(), handle).await {
                Ok(Ok(())) => debug!(source = self.name, "producer joined"),
                Ok(Err(e)) => error!(error = %e, "producer task panicked"),
                Err(_) => warn!(
                    source = self.name,
                    timeout = ?self.config.stop_timeout(),
                    "stop requested, cleanup deferred"
                ),
            }
        }

        let stats = self.buffer.stats();
        info!(
            source = self.name,
            displayed = self.displayed,
            pushed = stats.pushed,
            evicted = stats.evicted,
            discarded = stats.discarded,
            "playback stopped"
        );
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> Option<Duration> {
        self.position
    }

    pub fn displayed(&self) -> u64 {
        self.displayed
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::Relaxed);
        self.buffer.close();
    }
}

/// Producer loop: runs on the blocking pool and owns the source.
fn produce(
    mut source: Box<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    shared: Arc<ProducerShared>,
    commands: flume::Receiver<ProducerCommand>,
) {
    // Frames stamped before this are left over from before a seek.
    let mut min_timestamp: Option<Duration> = None;
    let mut at_end = false;

    loop {
        if shared.cancel.load(Ordering::Relaxed) {
            debug!(source = source.name(), "producer cancelled");
            break;
        }

        let command = if at_end {
            match commands.recv_timeout(IDLE_POLL) {
                Ok(command) => Some(command),
                Err(flume::RecvTimeoutError::Timeout) => None,
                Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(flume::TryRecvError::Empty) => None,
                Err(flume::TryRecvError::Disconnected) => break,
            }
        };

        if let Some(ProducerCommand::Seek { target, reply }) = command {
            let result = source.seek(target);
            if let Ok(outcome) = &result {
                buffer.clear();
                min_timestamp = Some(outcome.position);
                at_end = false;
                shared.set_status(ProducerStatus::Running);
                shared.touch();
                debug!(position = ?outcome.position, "producer repositioned");
            }
            // The controller may have given up waiting.
            let _ = reply.send(result);
            continue;
        }

        if at_end {
            continue;
        }

        let epoch = buffer.epoch();
        match source.read() {
            Ok(Some(frame)) => {
                shared.touch();
                if let (Some(min), Some(ts)) = (min_timestamp, frame.timestamp()) {
                    if ts < min {
                        continue;
                    }
                }
                if let PushOutcome::Evicted(seq) = buffer.push_at(frame, epoch) {
                    debug!(evicted = seq, "buffer full, dropped oldest frame");
                }
            }
            Ok(None) => {
                info!(source = source.name(), "end of stream");
                shared.set_status(ProducerStatus::Ended);
                buffer.finish();
                at_end = true;
            }
            Err(e) if e.is_recoverable() => {
                shared.touch();
                warn!(error = %e, "skipping undecodable frame");
            }
            Err(e) => {
                error!(error = %e, "source failed, ending stream");
                shared.set_status(ProducerStatus::Failed(e.to_string()));
                buffer.finish();
                break;
            }
        }
    }

    source.close();
}
