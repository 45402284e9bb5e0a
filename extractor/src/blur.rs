use framekeep_common::frame::Frame;

/// Sharpness gate based on the variance of the Laplacian.
///
/// Sharp frames carry high-frequency edges and therefore a high Laplacian
/// variance; motion blur and defocus flatten it.
#[derive(Debug, Clone, Copy)]
pub struct BlurDetector {
    threshold: f64,
}

impl BlurDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn score(&self, frame: &Frame) -> f64 {
        laplacian_variance(&frame.luma(), frame.width() as usize, frame.height() as usize)
    }

    #[allow(dead_code)]
    pub fn is_blurry(&self, frame: &Frame) -> bool {
        self.is_blurry_score(self.score(frame))
    }

    pub fn is_blurry_score(&self, sharpness: f64) -> bool {
        sharpness < self.threshold
    }
}

/// Mirror an out-of-range index back inside `0..len` without repeating the edge.
fn reflect_101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mirrored = if i < 0 {
        -i
    } else if i > last {
        2 * last - i
    } else {
        i
    };
    mirrored.clamp(0, last) as usize
}

/// Population variance of the 4-neighbour Laplacian over every pixel.
///
/// Borders are handled by reflection so small frames still get a score.
pub fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f64 {
    if width == 0 || height == 0 || gray.len() < width * height {
        return 0.0;
    }

    let at = |x: isize, y: isize| -> i32 {
        gray[reflect_101(y, height) * width + reflect_101(x, width)] as i32
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let laplacian =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4 * at(x, y);
            let v = laplacian as f64;
            sum += v;
            sum_sq += v * v;
        }
    }

    let n = (width * height) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_common::frame::PixelFormat;

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Frame {
        let data: Vec<u8> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Frame::new(0, width, height, PixelFormat::Gray8, data).unwrap()
    }

    #[test]
    fn flat_frame_has_zero_sharpness() {
        let detector = BlurDetector::new(100.0);
        let frame = gray(16, 16, |_, _| 128);
        assert_eq!(detector.score(&frame), 0.0);
        assert!(detector.is_blurry(&frame));
    }

    #[test]
    fn checkerboard_is_sharp() {
        let detector = BlurDetector::new(100.0);
        let frame = gray(16, 16, |x, y| if (x + y) % 2 == 0 { 255 } else { 0 });
        // Every pixel is +-1020 after the Laplacian with reflected borders.
        assert!((detector.score(&frame) - 1020.0 * 1020.0).abs() < 1e-6);
        assert!(!detector.is_blurry(&frame));
    }

    #[test]
    fn single_impulse_matches_hand_computation() {
        // One bright pixel in the middle of a 3x3 field: Laplacian is -4 at the
        // centre and +2 at each edge neighbour, which sees the centre twice
        // through the reflected border. Corners stay 0.
        let frame = gray(3, 3, |x, y| if (x, y) == (1, 1) { 1 } else { 0 });
        let values = [-4.0f64, 2.0, 2.0, 2.0, 2.0];
        let mean = values.iter().sum::<f64>() / 9.0;
        let expected = values.iter().map(|v| v * v).sum::<f64>() / 9.0 - mean * mean;
        let score = BlurDetector::new(0.0).score(&frame);
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn reflection_skips_the_edge_pixel() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(-1, 1), 0);
    }
}
