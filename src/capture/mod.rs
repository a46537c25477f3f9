pub mod decoder;
pub mod frame;
pub mod image_dir;
pub mod mjpeg;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::utils::SourceKind;
use crate::CaptureConfig;

pub use frame::{Frame, FrameError, FrameMetadata, PixelFormat};
pub use image_dir::ImageSequence;
pub use mjpeg::MjpegSource;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("source {identifier:?} unavailable: {reason}")]
    SourceUnavailable { identifier: String, reason: String },
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl CaptureError {
    pub fn unavailable(identifier: impl Display, reason: impl Display) -> Self {
        Self::SourceUnavailable {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Sequential video input, read until exhausted or closed
pub trait FrameSource: Send {
    /// Next frame, `None` once the stream is exhausted
    fn read_next(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying handle. Sources also release on drop.
    fn close(&mut self) {}
}

/// Opens a [`FrameSource`] for a source identifier
pub trait SourceOpener: Send + Sync {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Picks the capture backend from the shape of the identifier
#[derive(Debug, Clone, Copy)]
pub struct DefaultSourceOpener {
    stall_timeout: Duration,
}

impl DefaultSourceOpener {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            stall_timeout: config.stall_timeout(),
        }
    }
}

impl Default for DefaultSourceOpener {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        let kind = SourceKind::classify(identifier);
        info!("Opening {:?} source {}", kind, identifier);

        match kind {
            SourceKind::MjpegHttp => Ok(Box::new(MjpegSource::connect(
                identifier,
                self.stall_timeout,
            )?)),
            SourceKind::MjpegFile => Ok(Box::new(MjpegSource::open_file(Path::new(identifier))?)),
            SourceKind::ImageSequence => Ok(Box::new(ImageSequence::open(Path::new(identifier))?)),
            SourceKind::Device => open_device(identifier),
            SourceKind::Uri => open_uri(identifier),
        }
    }
}

#[cfg(feature = "v4l2-capture")]
fn open_device(identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(v4l2::V4l2Capture::open(identifier)?))
}

#[cfg(not(feature = "v4l2-capture"))]
fn open_device(identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::unavailable(
        identifier,
        "built without the v4l2-capture feature",
    ))
}

#[cfg(feature = "gstreamer-pipeline")]
fn open_uri(identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(gst_capture::GstCapture::open(identifier)?))
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn open_uri(identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::unavailable(
        identifier,
        "RTSP and container files need the gstreamer-pipeline feature",
    ))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{codecs::jpeg::JpegEncoder, ExtendedColorType};

    pub(crate) fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![200u8; (width * height * 3) as usize];
        let mut out = Vec::new();
        JpegEncoder::new(&mut out)
            .encode(&pixels, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_source_unavailable() {
        let missing = std::env::temp_dir().join(format!("{}.mjpeg", uuid::Uuid::new_v4()));
        let err = DefaultSourceOpener::default()
            .open(missing.to_str().unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::SourceUnavailable { .. }));
    }

    #[cfg(not(feature = "gstreamer-pipeline"))]
    #[test]
    fn rtsp_needs_gstreamer() {
        let err = DefaultSourceOpener::default()
            .open("rtsp://camera.local/stream")
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::SourceUnavailable { .. }));
    }
}
