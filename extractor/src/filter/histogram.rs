use framekeep_common::frame::Frame;

use super::traits::{Comparison, Polarity, SimilarityMetric, SimilarityScore};

const HUE_BINS: usize = 50;
const SAT_BINS: usize = 50;
/// 8-bit hue is stored in half-degrees, 0..180.
const HUE_RANGE: f64 = 180.0;
const SAT_RANGE: f64 = 256.0;

/// Hue/saturation histogram, min-max normalized to [0, 1].
#[derive(Debug, Clone)]
pub struct HueSatHistogram {
    bins: Vec<f64>,
}

impl HueSatHistogram {
    pub fn from_frame(frame: &Frame) -> Self {
        let mut bins = vec![0.0f64; HUE_BINS * SAT_BINS];
        for [r, g, b] in frame.rgb_pixels() {
            let (h, s) = hue_sat(r, g, b);
            let hb = (h as f64 * HUE_BINS as f64 / HUE_RANGE) as usize;
            let sb = (s as f64 * SAT_BINS as f64 / SAT_RANGE) as usize;
            bins[hb.min(HUE_BINS - 1) * SAT_BINS + sb.min(SAT_BINS - 1)] += 1.0;
        }
        normalize_min_max(&mut bins);
        Self { bins }
    }

    #[cfg(test)]
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }
}

/// 8-bit hue (0..180) and saturation (0..=255) of one pixel.
fn hue_sat(r: u8, g: u8, b: u8) -> (u8, u8) {
    let (rf, gf, bf) = (r as f64, g as f64, b as f64);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 {
        (255.0 * delta / max).round()
    } else {
        0.0
    };

    if delta == 0.0 {
        return (0, s as u8);
    }

    let mut degrees = if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if degrees < 0.0 {
        degrees += 360.0;
    }
    let h = (degrees / 2.0).round() as u32 % 180;
    (h as u8, s as u8)
}

fn normalize_min_max(bins: &mut [f64]) {
    let min = bins.iter().copied().fold(f64::INFINITY, f64::min);
    let max = bins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let scale = if range > f64::EPSILON { 1.0 / range } else { 0.0 };
    for bin in bins.iter_mut() {
        *bin = (*bin - min) * scale;
    }
}

/// Pearson correlation of two histograms. Degenerate inputs correlate fully.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 1.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let mut num = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        num += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = var_a * var_b;
    if denom.abs() > f64::EPSILON {
        num / denom.sqrt()
    } else {
        1.0
    }
}

/// Color-distribution change detector. Insensitive to motion that keeps the
/// palette, sensitive to lighting and scene cuts.
pub struct HistogramMetric {
    threshold: f64,
}

impl HistogramMetric {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl SimilarityMetric for HistogramMetric {
    type Signature = HueSatHistogram;

    fn signature(&self, frame: &Frame) -> HueSatHistogram {
        HueSatHistogram::from_frame(frame)
    }

    fn compare(&self, current: &HueSatHistogram, reference: &HueSatHistogram) -> Comparison {
        let value = correlation(&reference.bins, &current.bins);
        Comparison::single(SimilarityScore::new(
            "correlation",
            value,
            self.threshold,
            Polarity::HigherIsSimilar,
        ))
    }

    fn name(&self) -> &str {
        "histogram"
    }
}
