use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// An ordered, timestamped stream of frames.
///
/// `read` may block. `Ok(None)` is end of stream, not an error. A source is
/// owned by exactly one reader at a time; `close` runs once that reader is
/// done with it, on every exit path.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Reposition so the next `read` returns the first frame at or after
    /// `offset`. Offsets past the end are clamped to the last frame.
    fn seek(&mut self, offset: Duration) -> Result<SeekOutcome, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }

    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    fn close(&mut self) {}
}

/// Where a seek actually landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekOutcome {
    pub requested: Duration,
    pub position: Duration,
    /// The request was outside the stream and was pulled back to its last frame.
    pub clamped: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source {uri} unavailable: {reason}")]
    Unavailable { uri: String, reason: String },
    #[error("frame {seq} could not be decoded: {reason}")]
    Decode { seq: u64, reason: String },
    #[error("source {0} does not support seeking")]
    SeekUnsupported(String),
}

impl SourceError {
    /// A single unreadable frame; the stream itself is still usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Decode { .. })
    }
}

/// A directory of image files played back at a fixed frame rate.
///
/// Files are ordered by name, so frame numbers should be zero-padded.
/// Sequence numbers are file positions and timestamps are `seq / fps`.
pub struct ImageSequenceSource {
    name: String,
    files: Vec<PathBuf>,
    fps: f64,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open(path: &Path, fps: f64) -> Result<Self, SourceError> {
        let unavailable = |reason: String| SourceError::Unavailable {
            uri: path.display().to_string(),
            reason,
        };

        if !fps.is_finite() || fps <= 0.0 {
            return Err(unavailable(format!("invalid frame rate {fps}")));
        }

        let entries = std::fs::read_dir(path).map_err(|e| unavailable(e.to_string()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(e.to_string()))?;
            let file = entry.path();
            if file.is_file() && has_image_extension(&file) {
                files.push(file);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(unavailable("no image files found".into()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        info!(source = name, frames = files.len(), fps, "opened image sequence");

        Ok(Self {
            name,
            files,
            fps,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn timestamp_of(&self, seq: u64) -> Duration {
        Duration::from_nanos((seq as f64 * 1e9 / self.fps).round() as u64)
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let seq = self.cursor as u64;
        self.cursor += 1;

        let image = image::open(path).map_err(|e| SourceError::Decode {
            seq,
            reason: format!("{}: {e}", path.display()),
        })?;

        Ok(Some(
            Frame::from_rgb_image(seq, image.to_rgb8()).with_timestamp(self.timestamp_of(seq)),
        ))
    }

    fn seek(&mut self, offset: Duration) -> Result<SeekOutcome, SourceError> {
        let last = self.files.len().saturating_sub(1);
        // Round up so the landing frame never precedes the requested offset.
        let wanted = (offset.as_secs_f64() * self.fps - 1e-9).ceil().max(0.0) as usize;
        let clamped = wanted > last;
        let index = wanted.min(last);
        self.cursor = index;

        let outcome = SeekOutcome {
            requested: offset,
            position: self.timestamp_of(index as u64),
            clamped,
        };
        debug!(source = self.name, index, clamped, "image sequence repositioned");
        Ok(outcome)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.timestamp_of(self.files.len() as u64))
    }

    fn close(&mut self) {
        debug!(source = self.name, "image sequence closed");
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Opens the source behind `uri`.
pub fn open_source(uri: &Path, fps: f64) -> Result<Box<dyn FrameSource>, SourceError> {
    if uri.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(uri, fps)?));
    }
    Err(SourceError::Unavailable {
        uri: uri.display().to_string(),
        reason: "not a directory of frames".into(),
    })
}

/// Sub-directories of `root`, one per stream, sorted by name.
pub fn discover_streams(root: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = std::fs::read_dir(root).map_err(|e| SourceError::Unavailable {
        uri: root.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut streams: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    streams.sort();
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_sequence(dir: &Path, count: u32) {
        for i in 0..count {
            let img = RgbImage::from_pixel(4, 4, Rgb([i as u8 * 10, 0, 0]));
            img.save(dir.join(format!("frame_{i:05}.png"))).unwrap();
        }
    }

    #[test]
    fn reads_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 3);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 10.0).unwrap();
        assert_eq!(source.len(), 3);

        let first = source.read().unwrap().unwrap();
        assert_eq!(first.seq(), 0);
        assert_eq!(first.timestamp(), Some(Duration::ZERO));
        let second = source.read().unwrap().unwrap();
        assert_eq!(second.seq(), 1);
        assert_eq!(second.timestamp(), Some(Duration::from_millis(100)));
        assert_eq!(second.to_rgb8().get_pixel(0, 0).0, [10, 0, 0]);
        source.read().unwrap().unwrap();
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn seek_lands_at_or_after_offset() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 10);
        let mut source = ImageSequenceSource::open(dir.path(), 10.0).unwrap();

        let outcome = source.seek(Duration::from_millis(250)).unwrap();
        assert!(!outcome.clamped);
        assert_eq!(outcome.position, Duration::from_millis(300));
        assert_eq!(source.read().unwrap().unwrap().seq(), 3);
    }

    #[test]
    fn seek_past_end_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 5);
        let mut source = ImageSequenceSource::open(dir.path(), 10.0).unwrap();

        let outcome = source.seek(Duration::from_secs(60)).unwrap();
        assert!(outcome.clamped);
        assert_eq!(source.read().unwrap().unwrap().seq(), 4);
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_a_recoverable_error() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 1);
        std::fs::write(dir.path().join("frame_00001.png"), b"not a png").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 30.0).unwrap();
        assert!(source.read().unwrap().is_some());
        let err = source.read().unwrap_err();
        assert!(err.is_recoverable());
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn missing_or_empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 30.0),
            Err(SourceError::Unavailable { .. })
        ));
        assert!(open_source(&dir.path().join("missing"), 30.0).is_err());
    }
}
