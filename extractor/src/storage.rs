use framekeep_common::config::{ImageFormatKind, OutputConfig};
use framekeep_common::frame::Frame;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Destination for accepted keyframes.
pub trait KeyframeSink: Send {
    /// Persists `frame` under its original stream index and returns where it went.
    /// Indices must increase from call to call.
    fn write_keyframe(&mut self, index: u64, frame: &Frame) -> Result<PathBuf, SinkError>;

    fn written(&self) -> u64;

    /// Human-readable location for logging.
    fn location(&self) -> String;
}

/// Writes `{prefix}{index:05}.{ext}` files into one directory.
///
/// Each file is encoded to a hidden `.partial` sibling and renamed into place,
/// so a crash or cancellation never leaves a truncated keyframe behind.
pub struct DirectorySink {
    dir: PathBuf,
    prefix: String,
    format: ImageFormatKind,
    last_index: Option<u64>,
    written: u64,
}

impl DirectorySink {
    pub fn create(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        format: ImageFormatKind,
    ) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| SinkError::CreateDir(dir.clone(), e))?;
        info!(dir = %dir.display(), ?format, "keyframe directory ready");
        Ok(Self {
            dir,
            prefix: prefix.into(),
            format,
            last_index: None,
            written: 0,
        })
    }

    pub fn from_config(config: &OutputConfig, dir: &Path) -> Result<Self, SinkError> {
        Self::create(dir, config.prefix.clone(), config.format)
    }

    pub fn file_name(&self, index: u64) -> String {
        format!("{}{:05}.{}", self.prefix, index, self.format.extension())
    }
}

impl KeyframeSink for DirectorySink {
    fn write_keyframe(&mut self, index: u64, frame: &Frame) -> Result<PathBuf, SinkError> {
        if let Some(last) = self.last_index {
            if index <= last {
                return Err(SinkError::OutOfOrder { index, last });
            }
        }

        let name = self.file_name(index);
        let target = self.dir.join(&name);
        let partial = self.dir.join(format!(".{name}.partial"));

        let image_format = match self.format {
            ImageFormatKind::Png => ImageFormat::Png,
            ImageFormatKind::Jpeg => ImageFormat::Jpeg,
        };

        if let Err(e) = frame.to_rgb8().save_with_format(&partial, image_format) {
            if let Err(cleanup) = std::fs::remove_file(&partial) {
                debug!(path = %partial.display(), error = %cleanup, "no partial file to clean up");
            }
            return Err(SinkError::Encode(target, e.to_string()));
        }

        if let Err(e) = std::fs::rename(&partial, &target) {
            warn!(path = %partial.display(), error = %e, "failed to move keyframe into place");
            if let Err(cleanup) = std::fs::remove_file(&partial) {
                debug!(path = %partial.display(), error = %cleanup, "partial file left behind");
            }
            return Err(SinkError::Rename(target, e));
        }

        self.last_index = Some(index);
        self.written += 1;
        debug!(index, path = %target.display(), "keyframe written");
        Ok(target)
    }

    fn written(&self) -> u64 {
        self.written
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to create output directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to encode keyframe {0}: {1}")]
    Encode(PathBuf, String),
    #[error("failed to move keyframe into {0}: {1}")]
    Rename(PathBuf, std::io::Error),
    #[error("keyframe index {index} does not follow {last}")]
    OutOfOrder { index: u64, last: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_common::frame::PixelFormat;

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, 4, 2, PixelFormat::Rgb8, vec![seq as u8; 24]).unwrap()
    }

    #[test]
    fn writes_zero_padded_names_with_original_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink =
            DirectorySink::create(dir.path().join("out"), "frame_", ImageFormatKind::Png).unwrap();

        let path = sink.write_keyframe(42, &frame(42)).unwrap();
        assert_eq!(path, dir.path().join("out").join("frame_00042.png"));
        assert_eq!(sink.written(), 1);

        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [42, 42, 42]);
    }

    #[test]
    fn leaves_no_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path(), "key", ImageFormatKind::Jpeg).unwrap();
        sink.write_keyframe(0, &frame(0)).unwrap();
        sink.write_keyframe(7, &frame(7)).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["key00000.jpg", "key00007.jpg"]);
    }

    #[test]
    fn rejects_non_increasing_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path(), "f", ImageFormatKind::Png).unwrap();
        sink.write_keyframe(5, &frame(5)).unwrap();
        assert!(matches!(
            sink.write_keyframe(5, &frame(5)),
            Err(SinkError::OutOfOrder { index: 5, last: 5 })
        ));
        assert_eq!(sink.written(), 1);
    }

    #[test]
    fn failed_rename_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory squatting on the target name makes the rename fail.
        let blocker = dir.path().join("f00003.png");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let mut sink = DirectorySink::create(dir.path(), "f", ImageFormatKind::Png).unwrap();
        assert!(matches!(
            sink.write_keyframe(3, &frame(3)),
            Err(SinkError::Rename(path, _)) if path == blocker
        ));
        assert_eq!(sink.written(), 0);
        assert!(!dir.path().join(".f00003.png.partial").exists());

        // The failed index was never recorded.
        assert!(sink.write_keyframe(4, &frame(4)).is_ok());
    }
}
