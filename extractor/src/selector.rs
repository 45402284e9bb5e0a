use framekeep_common::config::{MetricKind, SelectorConfig, SpacingMode};
use framekeep_common::frame::Frame;
use std::fmt;
use tracing::debug;

use crate::blur::BlurDetector;
use crate::filter::{
    Comparison, HistogramMetric, PerceptualHashMetric, SimilarityMetric, StructuralMetric,
};

/// Why a frame was not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Blurry,
    TooSimilar,
    TooSoon,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::Blurry => "blurry",
            RejectReason::TooSimilar => "too_similar",
            RejectReason::TooSoon => "too_soon",
        })
    }
}

/// Outcome of evaluating one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub seq: u64,
    pub keep: bool,
    /// Scores against the reference; `None` for the first frame and for
    /// frames rejected by the blur gate before comparison.
    pub comparison: Option<Comparison>,
    pub sharpness: Option<f64>,
    pub reason: Option<RejectReason>,
}

impl Decision {
    fn kept(seq: u64, comparison: Option<Comparison>, sharpness: Option<f64>) -> Self {
        Self {
            seq,
            keep: true,
            comparison,
            sharpness,
            reason: None,
        }
    }

    fn rejected(
        seq: u64,
        reason: RejectReason,
        comparison: Option<Comparison>,
        sharpness: Option<f64>,
    ) -> Self {
        Self {
            seq,
            keep: false,
            comparison,
            sharpness,
            reason: Some(reason),
        }
    }
}

/// Minimum distance between kept frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpacingGate {
    pub min_frames: u64,
    pub mode: SpacingMode,
}

impl SpacingGate {
    fn allows(&self, seq: u64, last_kept: u64) -> bool {
        if self.min_frames == 0 {
            return true;
        }
        match self.mode {
            SpacingMode::SinceLastKeep => seq.saturating_sub(last_kept) >= self.min_frames,
            SpacingMode::Cadence => seq % self.min_frames == 0,
        }
    }
}

/// Which gates run besides the similarity test.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatePolicy {
    pub blur: Option<BlurDetector>,
    pub spacing: Option<SpacingGate>,
}

impl GatePolicy {
    pub fn none() -> Self {
        Self::default()
    }
}

struct Reference<S> {
    signature: S,
    seq: u64,
}

/// Stateful keep/skip engine over one stream.
///
/// Holds the signature of the last kept frame. The first frame is always
/// kept; after that a frame is kept only when it passes the blur gate, differs
/// from the reference, and satisfies the spacing gate. The reference only
/// moves on keep.
pub struct KeyframeSelector<M: SimilarityMetric> {
    metric: M,
    gates: GatePolicy,
    reference: Option<Reference<M::Signature>>,
}

impl<M: SimilarityMetric> KeyframeSelector<M> {
    pub fn new(metric: M, gates: GatePolicy) -> Self {
        Self {
            metric,
            gates,
            reference: None,
        }
    }

    pub fn evaluate(&mut self, frame: &Frame) -> Decision {
        let seq = frame.seq();

        let Some(reference) = &self.reference else {
            debug!(seq, metric = self.metric.name(), "first frame, keeping unconditionally");
            self.reference = Some(Reference {
                signature: self.metric.signature(frame),
                seq,
            });
            return Decision::kept(seq, None, None);
        };

        let mut sharpness = None;
        if let Some(detector) = &self.gates.blur {
            let score = detector.score(frame);
            sharpness = Some(score);
            if detector.is_blurry_score(score) {
                debug!(seq, sharpness = score, "rejected: blurry");
                return Decision::rejected(seq, RejectReason::Blurry, None, sharpness);
            }
        }

        let signature = self.metric.signature(frame);
        let comparison = self.metric.compare(&signature, &reference.signature);
        let spacing_ok = self
            .gates
            .spacing
            .map(|gate| gate.allows(seq, reference.seq))
            .unwrap_or(true);

        let reason = if !spacing_ok {
            Some(RejectReason::TooSoon)
        } else if !comparison.is_different() {
            Some(RejectReason::TooSimilar)
        } else {
            None
        };

        let score = comparison.primary().map(|s| s.value);
        match reason {
            Some(reason) => {
                debug!(seq, score, %reason, "frame skipped");
                Decision::rejected(seq, reason, Some(comparison), sharpness)
            }
            None => {
                debug!(seq, score, sharpness, "keyframe selected");
                self.reference = Some(Reference { signature, seq });
                Decision::kept(seq, Some(comparison), sharpness)
            }
        }
    }

    /// Forget the reference, as for a new stream.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    #[cfg(test)]
    pub fn reference_seq(&self) -> Option<u64> {
        self.reference.as_ref().map(|r| r.seq)
    }
}

/// Object-safe face of [`KeyframeSelector`] so the metric can be chosen at runtime.
pub trait FrameSelector: Send {
    fn evaluate(&mut self, frame: &Frame) -> Decision;

    fn reset(&mut self);

    fn name(&self) -> &str;
}

impl<M: SimilarityMetric> FrameSelector for KeyframeSelector<M> {
    fn evaluate(&mut self, frame: &Frame) -> Decision {
        KeyframeSelector::evaluate(self, frame)
    }

    fn reset(&mut self) {
        KeyframeSelector::reset(self)
    }

    fn name(&self) -> &str {
        self.metric.name()
    }
}

/// Builds the selector for the configured metric. Only the structural
/// variant applies the blur and spacing gates.
pub fn build_selector(config: &SelectorConfig) -> Box<dyn FrameSelector> {
    match config.metric {
        MetricKind::Structural => Box::new(KeyframeSelector::new(
            StructuralMetric::new(config.ssim_threshold, config.diff_threshold),
            GatePolicy {
                blur: Some(BlurDetector::new(config.blur_threshold)),
                spacing: Some(SpacingGate {
                    min_frames: config.min_spacing,
                    mode: config.spacing,
                }),
            },
        )),
        MetricKind::Histogram => Box::new(KeyframeSelector::new(
            HistogramMetric::new(config.histogram_threshold),
            GatePolicy::none(),
        )),
        MetricKind::Phash => Box::new(KeyframeSelector::new(
            PerceptualHashMetric::new(config.phash_threshold),
            GatePolicy::none(),
        )),
    }
}
