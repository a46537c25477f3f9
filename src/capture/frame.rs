use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    Size {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable pixel data, shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,

    /// Wall-clock capture time for records
    pub captured_at: DateTime<Local>,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Capture index, monotonically increasing per source
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl Frame {
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::Size {
                expected,
                actual: data.len(),
                width,
                height,
            });
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                format,
            }),
            timestamp: Instant::now(),
            captured_at: Local::now(),
        })
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    /// Copy into an RGB image, swapping channels for BGR sources
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        let mut pixels = self.data.to_vec();
        if self.meta.format == PixelFormat::Bgr24 {
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }

        let actual = pixels.len();
        RgbImage::from_raw(self.meta.width, self.meta.height, pixels).ok_or(FrameError::Size {
            expected: self.meta.width as usize * self.meta.height as usize * 3,
            actual,
            width: self.meta.width,
            height: self.meta.height,
        })
    }

    /// PNG bytes, the wire format shared by every collaborator
    pub fn encode_png(&self) -> Result<Vec<u8>, FrameError> {
        let image = self.to_rgb_image()?;
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
