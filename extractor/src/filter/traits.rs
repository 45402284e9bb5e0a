use framekeep_common::frame::Frame;

/// Which direction of a score means "the scene changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Similarity scores (SSIM, histogram correlation): a change is a drop below the threshold.
    HigherIsSimilar,
    /// Distances (pixel difference, hash distance): a change is a rise above the threshold.
    HigherIsDifferent,
}

/// One raw score together with the rule for reading it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScore {
    pub label: &'static str,
    pub value: f64,
    pub threshold: f64,
    pub polarity: Polarity,
}

impl SimilarityScore {
    pub fn new(label: &'static str, value: f64, threshold: f64, polarity: Polarity) -> Self {
        Self {
            label,
            value,
            threshold,
            polarity,
        }
    }

    pub fn indicates_change(&self) -> bool {
        match self.polarity {
            Polarity::HigherIsSimilar => self.value < self.threshold,
            Polarity::HigherIsDifferent => self.value > self.threshold,
        }
    }
}

/// Scores of one frame against the reference. Any score crossing its
/// threshold makes the frame count as different.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub scores: Vec<SimilarityScore>,
}

impl Comparison {
    pub fn single(score: SimilarityScore) -> Self {
        Self {
            scores: vec![score],
        }
    }

    pub fn is_different(&self) -> bool {
        self.scores.iter().any(SimilarityScore::indicates_change)
    }

    /// The first score, reported as "the" score for overlays and logs.
    pub fn primary(&self) -> Option<&SimilarityScore> {
        self.scores.first()
    }
}

/// A way of comparing a frame with the last kept frame.
///
/// Implementations reduce a frame to a `Signature` once; the selector keeps
/// the signature of the last kept frame and compares each new one against it.
pub trait SimilarityMetric: Send {
    type Signature: Send;

    fn signature(&self, frame: &Frame) -> Self::Signature;

    fn compare(&self, current: &Self::Signature, reference: &Self::Signature) -> Comparison;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_decides_direction() {
        let ssim = SimilarityScore::new("ssim", 0.7, 0.8, Polarity::HigherIsSimilar);
        assert!(ssim.indicates_change());
        let ssim = SimilarityScore::new("ssim", 0.8, 0.8, Polarity::HigherIsSimilar);
        assert!(!ssim.indicates_change());

        let diff = SimilarityScore::new("diff", 16.0, 15.0, Polarity::HigherIsDifferent);
        assert!(diff.indicates_change());
        let diff = SimilarityScore::new("diff", 15.0, 15.0, Polarity::HigherIsDifferent);
        assert!(!diff.indicates_change());
    }

    #[test]
    fn any_crossing_score_marks_a_change() {
        let comparison = Comparison {
            scores: vec![
                SimilarityScore::new("ssim", 0.95, 0.8, Polarity::HigherIsSimilar),
                SimilarityScore::new("diff", 40.0, 15.0, Polarity::HigherIsDifferent),
            ],
        };
        assert!(comparison.is_different());
        assert_eq!(comparison.primary().map(|s| s.label), Some("ssim"));
    }
}
