use bytes::Bytes;
use image::RgbImage;
use std::time::Duration;

/// Channel layout of a frame's pixel bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    /// Channel order used by depth-camera color streams.
    Bgr8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// An immutable image plus its position in the stream.
///
/// Pixel bytes live in a `Bytes` handle, so cloning a frame never copies
/// pixels and no holder can mutate them.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    timestamp: Option<Duration>,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
}

impl Frame {
    pub fn new(
        seq: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                format,
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            seq,
            timestamp: None,
            width,
            height,
            format,
            data,
        })
    }

    pub fn from_rgb_image(seq: u64, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            seq,
            timestamp: None,
            width,
            height,
            format: PixelFormat::Rgb8,
            data: Bytes::from(image.into_raw()),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// A new frame at the same stream position carrying different pixels.
    pub fn with_pixels(
        &self,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let mut frame = Frame::new(self.seq, self.width, self.height, format, data)?;
        frame.timestamp = self.timestamp;
        Ok(frame)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Iterates pixels as `[r, g, b]` regardless of storage order.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        let format = self.format;
        self.data
            .chunks_exact(format.channels())
            .map(move |px| match format {
                PixelFormat::Gray8 => [px[0], px[0], px[0]],
                PixelFormat::Rgb8 => [px[0], px[1], px[2]],
                PixelFormat::Bgr8 => [px[2], px[1], px[0]],
            })
    }

    /// Single-channel luminance, row-major, `width * height` bytes.
    pub fn luma(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Gray8 => self.data.to_vec(),
            _ => self.rgb_pixels().map(|[r, g, b]| luma_of(r, g, b)).collect(),
        }
    }

    pub fn to_rgb8(&self) -> RgbImage {
        let raw: Vec<u8> = match self.format {
            PixelFormat::Rgb8 => self.data.to_vec(),
            _ => self.rgb_pixels().flatten().collect(),
        };
        // Length is validated at construction.
        RgbImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

/// BT.601 luma in 14-bit fixed point, rounded.
pub fn luma_of(r: u8, g: u8, b: u8) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    ((r as u32 * R + g as u32 * G + b as u32 * B + (1 << 13)) >> 14) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{width}x{height} {format:?} frame needs {expected} bytes, got {got}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        got: usize,
        expected: usize,
    },
}
