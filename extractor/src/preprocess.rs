use framekeep_common::config::PreprocessConfig;
use framekeep_common::frame::{Frame, FrameError, PixelFormat};
use tracing::debug;

/// Strength of the a*/b* shift toward neutral.
const WHITE_BALANCE_GAIN: f64 = 1.1;

/// Producer-side normalization applied before selection and writing:
/// optional LAB white balance followed by an optional gamma lookup.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    white_balance: bool,
    gamma_lut: Option<[u8; 256]>,
}

impl Preprocessor {
    pub fn from_config(config: &PreprocessConfig) -> Self {
        let gamma_lut = config
            .gamma
            .filter(|g| (g - 1.0).abs() > f64::EPSILON)
            .map(gamma_table);
        debug!(
            white_balance = config.white_balance,
            gamma = config.gamma,
            "preprocessor configured"
        );
        Self {
            white_balance: config.white_balance,
            gamma_lut,
        }
    }

    #[cfg(test)]
    pub fn identity() -> Self {
        Self {
            white_balance: false,
            gamma_lut: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        !self.white_balance && self.gamma_lut.is_none()
    }

    /// Returns the normalized frame as RGB, or the input itself when no step is enabled.
    pub fn apply(&self, frame: &Frame) -> Result<Frame, FrameError> {
        if self.is_identity() {
            return Ok(frame.clone());
        }

        let mut rgb: Vec<[u8; 3]> = frame.rgb_pixels().collect();
        if self.white_balance {
            auto_white_balance(&mut rgb);
        }
        if let Some(lut) = &self.gamma_lut {
            for px in rgb.iter_mut() {
                for c in px.iter_mut() {
                    *c = lut[*c as usize];
                }
            }
        }

        let data: Vec<u8> = rgb.into_iter().flatten().collect();
        frame.with_pixels(PixelFormat::Rgb8, data)
    }
}

/// `out = (in / 255)^(1 / gamma) * 255`, truncated.
pub fn gamma_table(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((i as f64 / 255.0).powf(inv) * 255.0).clamp(0.0, 255.0) as u8;
    }
    table
}

/// Shifts each pixel's a*/b* toward neutral by the frame's average cast,
/// weighted by the pixel's lightness so shadows are left mostly alone.
fn auto_white_balance(pixels: &mut [[u8; 3]]) {
    if pixels.is_empty() {
        return;
    }

    let lab: Vec<[u8; 3]> = pixels.iter().map(|&p| rgb_to_lab8(p)).collect();
    let n = lab.len() as f64;
    let avg_a = lab.iter().map(|p| p[1] as f64).sum::<f64>() / n;
    let avg_b = lab.iter().map(|p| p[2] as f64).sum::<f64>() / n;

    for (px, [l, a, b]) in pixels.iter_mut().zip(lab) {
        let weight = l as f64 / 255.0 * WHITE_BALANCE_GAIN;
        let a = (a as f64 - (avg_a - 128.0) * weight).clamp(0.0, 255.0) as u8;
        let b = (b as f64 - (avg_b - 128.0) * weight).clamp(0.0, 255.0) as u8;
        *px = lab8_to_rgb([l, a, b]);
    }
}

// sRGB (D65) <-> CIE L*a*b*, with L scaled to 0..=255 and a/b offset by 128.

const XN: f64 = 0.950456;
const ZN: f64 = 1.088754;
const EPS: f64 = 0.008856;

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f64) -> f64 {
    if t > EPS {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f64) -> f64 {
    let t = f * f * f;
    if t > EPS {
        t
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn rgb_to_lab8([r, g, b]: [u8; 3]) -> [u8; 3] {
    let r = srgb_to_linear(r as f64 / 255.0);
    let g = srgb_to_linear(g as f64 / 255.0);
    let b = srgb_to_linear(b as f64 / 255.0);

    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / XN;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / ZN;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > EPS { 116.0 * fy - 16.0 } else { 903.3 * y };

    [
        to_u8(l * 255.0 / 100.0),
        to_u8(500.0 * (fx - fy) + 128.0),
        to_u8(200.0 * (fy - fz) + 128.0),
    ]
}

fn lab8_to_rgb([l, a, b]: [u8; 3]) -> [u8; 3] {
    let l = l as f64 * 100.0 / 255.0;
    let a = a as f64 - 128.0;
    let b = b as f64 - 128.0;

    let fy = (l + 16.0) / 116.0;
    let x = lab_f_inv(fy + a / 500.0) * XN;
    let y = lab_f_inv(fy);
    let z = lab_f_inv(fy - b / 200.0) * ZN;

    let r = 3.240479 * x - 1.537150 * y - 0.498535 * z;
    let g = -0.969256 * x + 1.875991 * y + 0.041556 * z;
    let b = 0.055648 * x - 0.204043 * y + 1.057311 * z;

    [
        to_u8(linear_to_srgb(r.clamp(0.0, 1.0)) * 255.0),
        to_u8(linear_to_srgb(g.clamp(0.0, 1.0)) * 255.0),
        to_u8(linear_to_srgb(b.clamp(0.0, 1.0)) * 255.0),
    ]
}

fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
