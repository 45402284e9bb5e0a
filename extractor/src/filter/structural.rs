use framekeep_common::frame::Frame;

use super::traits::{Comparison, Polarity, SimilarityMetric, SimilarityScore};

const WINDOW: usize = 7;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Luminance plane kept as the structural reference.
#[derive(Debug, Clone)]
pub struct GrayPlane {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl GrayPlane {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width() as usize,
            height: frame.height() as usize,
            pixels: frame.luma(),
        }
    }
}

/// Structural change detector: mean SSIM over 7x7 windows OR'd with the mean
/// absolute luminance difference.
///
/// SSIM follows the usual definition with sample covariance, K1 = 0.01,
/// K2 = 0.03 and an 8-bit data range, averaged over every window that lies
/// fully inside the image.
pub struct StructuralMetric {
    ssim_threshold: f64,
    diff_threshold: f64,
}

impl StructuralMetric {
    pub fn new(ssim_threshold: f64, diff_threshold: f64) -> Self {
        Self {
            ssim_threshold,
            diff_threshold,
        }
    }
}

impl SimilarityMetric for StructuralMetric {
    type Signature = GrayPlane;

    fn signature(&self, frame: &Frame) -> GrayPlane {
        GrayPlane::from_frame(frame)
    }

    fn compare(&self, current: &GrayPlane, reference: &GrayPlane) -> Comparison {
        // A resolution change is a new scene.
        let (ssim, diff) = if current.width != reference.width
            || current.height != reference.height
        {
            (0.0, 255.0)
        } else {
            (
                mean_ssim(current, reference),
                mean_abs_diff(&current.pixels, &reference.pixels),
            )
        };

        Comparison {
            scores: vec![
                SimilarityScore::new("ssim", ssim, self.ssim_threshold, Polarity::HigherIsSimilar),
                SimilarityScore::new(
                    "diff",
                    diff,
                    self.diff_threshold,
                    Polarity::HigherIsDifferent,
                ),
            ],
        }
    }

    fn name(&self) -> &str {
        "structural"
    }
}

pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    total as f64 / a.len() as f64
}

/// Summed-area table over a per-pixel quantity.
struct Integral {
    stride: usize,
    sums: Vec<u64>,
}

impl Integral {
    fn build(width: usize, height: usize, value: impl Fn(usize) -> u64) -> Self {
        let stride = width + 1;
        let mut sums = vec![0u64; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0u64;
            for x in 0..width {
                row += value(y * width + x);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        self.sums[(y + h) * s + x + w] + self.sums[y * s + x]
            - self.sums[y * s + x + w]
            - self.sums[(y + h) * s + x]
    }
}

fn ssim_window(n: f64, sx: u64, sy: u64, sxx: u64, syy: u64, sxy: u64) -> f64 {
    let ux = sx as f64 / n;
    let uy = sy as f64 / n;
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let vx = cov_norm * (sxx as f64 / n - ux * ux);
    let vy = cov_norm * (syy as f64 / n - uy * uy);
    let vxy = cov_norm * (sxy as f64 / n - ux * uy);

    ((2.0 * ux * uy + C1) * (2.0 * vxy + C2)) / ((ux * ux + uy * uy + C1) * (vx + vy + C2))
}

pub fn mean_ssim(a: &GrayPlane, b: &GrayPlane) -> f64 {
    let (w, h) = (a.width, a.height);
    if w == 0 || h == 0 {
        return 1.0;
    }

    let px = |p: &[u8], i: usize| p[i] as u64;
    let (pa, pb) = (&a.pixels, &b.pixels);
    let ix = Integral::build(w, h, |i| px(pa, i));
    let iy = Integral::build(w, h, |i| px(pb, i));
    let ixx = Integral::build(w, h, |i| px(pa, i) * px(pa, i));
    let iyy = Integral::build(w, h, |i| px(pb, i) * px(pb, i));
    let ixy = Integral::build(w, h, |i| px(pa, i) * px(pb, i));

    // Images smaller than one window are scored as a single window.
    let (win_w, win_h) = (WINDOW.min(w), WINDOW.min(h));
    let n = (win_w * win_h) as f64;

    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..=h - win_h {
        for x in 0..=w - win_w {
            total += ssim_window(
                n,
                ix.window(x, y, win_w, win_h),
                iy.window(x, y, win_w, win_h),
                ixx.window(x, y, win_w, win_h),
                iyy.window(x, y, win_w, win_h),
                ixy.window(x, y, win_w, win_h),
            );
            count += 1;
        }
    }
    total / count as f64
}
