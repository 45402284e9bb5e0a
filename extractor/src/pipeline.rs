use framekeep_common::config::Config;
use framekeep_common::frame::FrameError;
use framekeep_common::source::{discover_streams, open_source, FrameSource, SourceError};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::filter::Comparison;
use crate::preprocess::Preprocessor;
use crate::selector::{build_selector, FrameSelector, RejectReason};
use crate::storage::{DirectorySink, KeyframeSink, SinkError};

/// Counters for one extracted stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub stream: String,
    pub output: String,
    pub processed: u64,
    pub kept: u64,
    pub blurry: u64,
    pub too_similar: u64,
    pub too_soon: u64,
    pub decode_failures: u64,
    /// Stopped early on request; everything written so far is complete.
    pub cancelled: bool,
}

impl ExtractionReport {
    pub fn rejected(&self) -> u64 {
        self.blurry + self.too_similar + self.too_soon
    }

    fn count_rejection(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::Blurry => self.blurry += 1,
            RejectReason::TooSimilar => self.too_similar += 1,
            RejectReason::TooSoon => self.too_soon += 1,
        }
    }

    pub fn log_summary(&self) {
        info!(
            stream = self.stream,
            processed = self.processed,
            kept = self.kept,
            blurry = self.blurry,
            too_similar = self.too_similar,
            too_soon = self.too_soon,
            decode_failures = self.decode_failures,
            cancelled = self.cancelled,
            output = self.output,
            "extraction finished"
        );
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// `ssim=0.412 diff=38.1` style rendering for logs.
pub fn format_scores(comparison: &Comparison) -> String {
    let mut out = String::new();
    for score in &comparison.scores {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{}={:.3}", score.label, score.value);
    }
    out
}

/// Pulls every frame from `source` through the selector and writes kept frames.
///
/// Unreadable frames are counted and skipped. The source is closed on every
/// exit path, including errors.
pub fn run_extraction(
    source: &mut dyn FrameSource,
    selector: &mut dyn FrameSelector,
    preprocessor: &Preprocessor,
    sink: &mut dyn KeyframeSink,
    cancel: &AtomicBool,
) -> Result<ExtractionReport, ExtractionError> {
    let mut report = ExtractionReport {
        stream: source.name().to_string(),
        output: sink.location(),
        ..ExtractionReport::default()
    };

    info!(
        stream = report.stream,
        selector = selector.name(),
        output = report.output,
        "extraction started"
    );

    let result = extract_frames(source, selector, preprocessor, sink, cancel, &mut report);
    source.close();
    result.map(|()| report)
}

fn extract_frames(
    source: &mut dyn FrameSource,
    selector: &mut dyn FrameSelector,
    preprocessor: &Preprocessor,
    sink: &mut dyn KeyframeSink,
    cancel: &AtomicBool,
    report: &mut ExtractionReport,
) -> Result<(), ExtractionError> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            info!(stream = report.stream, processed = report.processed, "extraction cancelled");
            report.cancelled = true;
            return Ok(());
        }

        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(stream = report.stream, error = %e, "skipping undecodable frame");
                report.decode_failures += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let frame = preprocessor.apply(&frame)?;
        let decision = selector.evaluate(&frame);
        report.processed += 1;

        if decision.keep {
            let path = sink.write_keyframe(frame.seq(), &frame)?;
            report.kept += 1;
            info!(
                seq = decision.seq,
                path = %path.display(),
                scores = %decision.comparison.as_ref().map(format_scores).unwrap_or_default(),
                sharpness = decision.sharpness,
                kept = report.kept,
                "saved keyframe"
            );
        } else if let Some(reason) = decision.reason {
            report.count_rejection(reason);
        }
    }
}

/// Extracts every sub-directory of `config.source.path` as its own stream,
/// writing into `output.dir/<stream>/`. Streams that cannot be opened are skipped.
pub fn run_batch(
    config: &Config,
    selector: &mut dyn FrameSelector,
    preprocessor: &Preprocessor,
    cancel: &AtomicBool,
) -> Result<Vec<ExtractionReport>, ExtractionError> {
    let streams = discover_streams(&config.source.path)?;
    info!(root = %config.source.path.display(), streams = streams.len(), "batch extraction");

    let mut reports = Vec::with_capacity(streams.len());
    for path in streams {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let mut source = match open_source(&path, config.source.fps) {
            Ok(source) => source,
            Err(e) => {
                warn!(stream = %path.display(), error = %e, "skipping stream");
                continue;
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.name().to_string());
        let mut sink = DirectorySink::from_config(&config.output, &config.output.dir.join(name))?;

        selector.reset();
        let report = run_extraction(source.as_mut(), selector, preprocessor, &mut sink, cancel)?;
        report.log_summary();
        let cancelled = report.cancelled;
        reports.push(report);
        if cancelled {
            break;
        }
    }
    Ok(reports)
}

/// Runs the extraction described by `config`: one stream, or a batch.
pub fn run(config: &Config, cancel: &AtomicBool) -> Result<Vec<ExtractionReport>, ExtractionError> {
    let mut selector = build_selector(&config.selector);
    let preprocessor = Preprocessor::from_config(&config.preprocess);

    if config.source.batch {
        return run_batch(config, selector.as_mut(), &preprocessor, cancel);
    }

    let mut source = open_source(&config.source.path, config.source.fps)?;
    let mut sink = DirectorySink::from_config(&config.output, &config.output.dir)?;
    let report = run_extraction(
        source.as_mut(),
        selector.as_mut(),
        &preprocessor,
        &mut sink,
        cancel,
    )?;
    report.log_summary();
    Ok(vec![report])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{GatePolicy, KeyframeSelector};
    use crate::filter::HistogramMetric;
    use framekeep_common::config::{ImageFormatKind, MetricKind};
    use framekeep_common::frame::{Frame, PixelFormat};
    use framekeep_common::source::SeekOutcome;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    type Step = Result<Option<Frame>, SourceError>;

    /// Replays a fixed script of reads.
    struct ScriptedSource {
        steps: VecDeque<Step>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    steps: steps.into(),
                    closed: closed.clone(),
                },
                closed,
            )
        }
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> Result<Option<Frame>, SourceError> {
            self.steps.pop_front().unwrap_or(Ok(None))
        }

        fn seek(&mut self, _offset: Duration) -> Result<SeekOutcome, SourceError> {
            Err(SourceError::SeekUnsupported("scripted".into()))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn solid(seq: u64, rgb: [u8; 3]) -> Step {
        Ok(Some(
            Frame::new(seq, 4, 4, PixelFormat::Rgb8, rgb.repeat(16)).unwrap(),
        ))
    }

    fn histogram_selector() -> KeyframeSelector<HistogramMetric> {
        KeyframeSelector::new(HistogramMetric::new(0.8), GatePolicy::none())
    }

    fn write_stream(dir: &Path, colors: &[[u8; 3]]) {
        std::fs::create_dir_all(dir).unwrap();
        for (i, &c) in colors.iter().enumerate() {
            RgbImage::from_pixel(8, 8, Rgb(c))
                .save(dir.join(format!("{i:04}.png")))
                .unwrap();
        }
    }

    fn list(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn keeps_changes_and_counts_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let (mut source, closed) = ScriptedSource::new(vec![
            solid(0, [255, 0, 0]),
            solid(1, [255, 0, 0]),
            Err(SourceError::Decode {
                seq: 2,
                reason: "truncated".into(),
            }),
            solid(3, [0, 0, 255]),
        ]);
        let mut sink = DirectorySink::create(dir.path(), "frame_", ImageFormatKind::Png).unwrap();
        let mut selector = histogram_selector();

        let report = run_extraction(
            &mut source,
            &mut selector,
            &Preprocessor::identity(),
            &mut sink,
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.kept, 2);
        assert_eq!(report.too_similar, 1);
        assert_eq!(report.decode_failures, 1);
        assert!(!report.cancelled);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(list(dir.path()), vec!["frame_00000.png", "frame_00003.png"]);
    }

    #[test]
    fn fatal_source_error_still_closes_source() {
        let dir = tempfile::tempdir().unwrap();
        let (mut source, closed) = ScriptedSource::new(vec![
            solid(0, [1, 2, 3]),
            Err(SourceError::Unavailable {
                uri: "cam".into(),
                reason: "unplugged".into(),
            }),
        ]);
        let mut sink = DirectorySink::create(dir.path(), "f", ImageFormatKind::Png).unwrap();

        let result = run_extraction(
            &mut source,
            &mut histogram_selector(),
            &Preprocessor::identity(),
            &mut sink,
            &AtomicBool::new(false),
        );
        assert!(matches!(
            result,
            Err(ExtractionError::Source(SourceError::Unavailable { .. }))
        ));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(sink.written(), 1);
    }

    #[test]
    fn cancellation_stops_before_next_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut source, closed) = ScriptedSource::new(vec![solid(0, [9, 9, 9])]);
        let mut sink = DirectorySink::create(dir.path(), "f", ImageFormatKind::Png).unwrap();

        let report = run_extraction(
            &mut source,
            &mut histogram_selector(),
            &Preprocessor::identity(),
            &mut sink,
            &AtomicBool::new(true),
        )
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn batch_writes_one_directory_per_stream() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let red = [255, 0, 0];
        let blue = [0, 0, 255];
        write_stream(&input.path().join("a"), &[red, red, red, blue, blue]);
        write_stream(&input.path().join("b"), &[[0, 255, 0], [0, 255, 0]]);
        std::fs::create_dir_all(input.path().join("c-empty")).unwrap();

        let config = Config::from_toml(&format!(
            r#"
            [source]
            path = "{}"
            batch = true

            [selector]
            metric = "histogram"

            [output]
            dir = "{}"
            prefix = "keyframe_"
            "#,
            input.path().display(),
            output.path().display()
        ))
        .unwrap();
        assert_eq!(config.selector.metric, MetricKind::Histogram);

        let reports = run(&config, &AtomicBool::new(false)).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].stream, "a");
        assert_eq!(reports[0].kept, 2);
        assert_eq!(reports[1].kept, 1);

        assert_eq!(
            list(&output.path().join("a")),
            vec!["keyframe_00000.png", "keyframe_00003.png"]
        );
        assert_eq!(list(&output.path().join("b")), vec!["keyframe_00000.png"]);
        assert!(!output.path().join("c-empty").exists());
    }

    #[test]
    fn scores_render_compactly() {
        use crate::filter::{Polarity, SimilarityScore};
        let comparison = Comparison {
            scores: vec![
                SimilarityScore::new("ssim", 0.41234, 0.8, Polarity::HigherIsSimilar),
                SimilarityScore::new("diff", 38.1, 15.0, Polarity::HigherIsDifferent),
            ],
        };
        assert_eq!(format_scores(&comparison), "ssim=0.412 diff=38.100");
    }
}
