use std::sync::Arc;

use framekeep_common::frame::Frame;
use image::imageops::{self, FilterType};
use image::GrayImage;
use rustdct::{Dct2, DctPlanner, TransformType2And3};

use super::traits::{Comparison, Polarity, SimilarityMetric, SimilarityScore};

const HASH_SIZE: usize = 8;
const SAMPLE_SIZE: usize = HASH_SIZE * 4;

/// Compute the hamming distance between two 64-bit hashes.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// DCT perceptual hash filter.
///
/// Algorithm:
/// 1. Luminance, resized to 32x32 with a Lanczos filter
/// 2. 2-D DCT-II over the resized plane
/// 3. Keep the 8x8 lowest-frequency block (DC included)
/// 4. Bit `row * 8 + col` is set when that coefficient exceeds the block median
///
/// Frames are different when the Hamming distance exceeds the threshold.
pub struct PerceptualHashMetric {
    threshold: u32,
    dct: Arc<dyn TransformType2And3<f64>>,
}

impl PerceptualHashMetric {
    pub fn new(threshold: u32) -> Self {
        let mut planner = DctPlanner::new();
        Self {
            threshold,
            dct: planner.plan_dct2(SAMPLE_SIZE),
        }
    }

    pub fn hash(&self, frame: &Frame) -> u64 {
        let gray = GrayImage::from_raw(frame.width(), frame.height(), frame.luma())
            .unwrap_or_else(|| GrayImage::new(frame.width(), frame.height()));
        let small = imageops::resize(
            &gray,
            SAMPLE_SIZE as u32,
            SAMPLE_SIZE as u32,
            FilterType::Lanczos3,
        );

        let mut plane: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();
        self.dct_2d(&mut plane);

        let mut low = [0.0f64; HASH_SIZE * HASH_SIZE];
        for row in 0..HASH_SIZE {
            for col in 0..HASH_SIZE {
                low[row * HASH_SIZE + col] = plane[row * SAMPLE_SIZE + col];
            }
        }

        let median = median(&low);
        low.iter()
            .enumerate()
            .fold(0u64, |hash, (i, &v)| if v > median { hash | (1 << i) } else { hash })
    }

    /// Separable DCT: rows, transpose, rows, transpose.
    fn dct_2d(&self, plane: &mut [f64]) {
        for _ in 0..2 {
            for row in plane.chunks_exact_mut(SAMPLE_SIZE) {
                self.dct.process_dct2(row);
            }
            transpose(plane, SAMPLE_SIZE);
        }
    }
}

fn transpose(plane: &mut [f64], n: usize) {
    for y in 0..n {
        for x in (y + 1)..n {
            plane.swap(y * n + x, x * n + y);
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

impl SimilarityMetric for PerceptualHashMetric {
    type Signature = u64;

    fn signature(&self, frame: &Frame) -> u64 {
        self.hash(frame)
    }

    fn compare(&self, current: &u64, reference: &u64) -> Comparison {
        let distance = hamming(*current, *reference);
        Comparison::single(SimilarityScore::new(
            "distance",
            distance as f64,
            self.threshold as f64,
            Polarity::HigherIsDifferent,
        ))
    }

    fn name(&self) -> &str {
        "phash"
    }
}
