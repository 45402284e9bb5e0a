pub mod histogram;
pub mod phash;
pub mod structural;
pub mod traits;

pub use histogram::HistogramMetric;
pub use phash::PerceptualHashMetric;
pub use structural::StructuralMetric;
pub use traits::{Comparison, Polarity, SimilarityMetric, SimilarityScore};
