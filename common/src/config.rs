use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Directory of frames, or a directory of such directories when `batch` is set.
    pub path: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub batch: bool,
}

/// Which similarity metric drives the keep/skip decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// SSIM OR mean-absolute-difference, with spacing and blur gates.
    Structural,
    /// Hue/saturation histogram correlation, no gates.
    Histogram,
    /// 64-bit DCT perceptual hash distance, no gates.
    Phash,
}

/// How the minimum-spacing gate counts frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpacingMode {
    /// `seq - last_kept_seq >= min_spacing`.
    SinceLastKeep,
    /// `seq % min_spacing == 0`.
    Cadence,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_metric")]
    pub metric: MetricKind,
    #[serde(default = "default_ssim_threshold")]
    pub ssim_threshold: f64,
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: f64,
    #[serde(default = "default_histogram_threshold")]
    pub histogram_threshold: f64,
    #[serde(default = "default_phash_threshold")]
    pub phash_threshold: u32,
    #[serde(default = "default_min_spacing")]
    pub min_spacing: u64,
    #[serde(default = "default_spacing")]
    pub spacing: SpacingMode,
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            ssim_threshold: default_ssim_threshold(),
            diff_threshold: default_diff_threshold(),
            histogram_threshold: default_histogram_threshold(),
            phash_threshold: default_phash_threshold(),
            min_spacing: default_min_spacing(),
            spacing: default_spacing(),
            blur_threshold: default_blur_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub white_balance: bool,
    /// Gamma applied after white balance; `None` or 1.0 leaves pixels untouched.
    #[serde(default)]
    pub gamma: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormatKind {
    Png,
    Jpeg,
}

impl ImageFormatKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormatKind::Png => "png",
            ImageFormatKind::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_output_prefix")]
    pub prefix: String,
    #[serde(default = "default_output_format")]
    pub format: ImageFormatKind,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            prefix: default_output_prefix(),
            format: default_output_format(),
        }
    }
}

/// What a full frame buffer does with the next pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The producer waits for the consumer to free a slot.
    Block,
    /// The oldest queued frame is evicted to make room.
    DropOldest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,
    /// Pace display at the stream's frame rate instead of as fast as frames arrive.
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    /// Overrides the source's own frame rate for pacing.
    #[serde(default)]
    pub target_fps: Option<f64>,
    /// Number of discrete seek positions across the stream.
    #[serde(default = "default_seek_steps")]
    pub seek_steps: u32,
    /// Used to map seek positions when the source cannot report its duration.
    #[serde(default = "default_approx_duration_secs")]
    pub approx_duration_secs: u64,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_seek_timeout_ms")]
    pub seek_timeout_ms: u64,
}

impl PlaybackConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            overflow: default_overflow(),
            realtime: default_realtime(),
            target_fps: None,
            seek_steps: default_seek_steps(),
            approx_duration_secs: default_approx_duration_secs(),
            stall_timeout_ms: default_stall_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            seek_timeout_ms: default_seek_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.source.fps.is_finite() || self.source.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "source.fps must be positive, got {}",
                self.source.fps
            )));
        }
        if self.playback.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "playback.buffer_capacity must be at least 1".into(),
            ));
        }
        if self.playback.seek_steps == 0 {
            return Err(ConfigError::Invalid(
                "playback.seek_steps must be at least 1".into(),
            ));
        }
        if let Some(gamma) = self.preprocess.gamma {
            if !gamma.is_finite() || gamma <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "preprocess.gamma must be positive, got {gamma}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_fps() -> f64 {
    30.0
}
fn default_metric() -> MetricKind {
    MetricKind::Structural
}
fn default_ssim_threshold() -> f64 {
    0.8
}
fn default_diff_threshold() -> f64 {
    15.0
}
fn default_histogram_threshold() -> f64 {
    0.8
}
fn default_phash_threshold() -> u32 {
    10
}
fn default_min_spacing() -> u64 {
    20
}
fn default_spacing() -> SpacingMode {
    SpacingMode::SinceLastKeep
}
fn default_blur_threshold() -> f64 {
    100.0
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./keyframes")
}
fn default_output_prefix() -> String {
    "frame_".into()
}
fn default_output_format() -> ImageFormatKind {
    ImageFormatKind::Png
}
fn default_buffer_capacity() -> usize {
    20
}
fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::DropOldest
}
fn default_realtime() -> bool {
    true
}
fn default_seek_steps() -> u32 {
    1000
}
fn default_approx_duration_secs() -> u64 {
    300
}
fn default_stall_timeout_ms() -> u64 {
    2000
}
fn default_stop_timeout_ms() -> u64 {
    500
}
fn default_seek_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".into()
}
