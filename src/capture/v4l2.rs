//! V4L2 MJPEG capture from `/dev/videoN`

use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder::decode_jpeg;
use super::{CaptureError, Frame, FrameSource};

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Capture {
    _device: Device,
    stream: Option<MmapStream<'static>>,
    path: String,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device and start streaming memory-mapped MJPEG buffers
    #[instrument]
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        let device = Device::with_path(path).map_err(|e| CaptureError::unavailable(path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::unavailable(path, e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::unavailable(
                path,
                "device doesn't support video capture",
            ));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::unavailable(path, e))?;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::unavailable(path, e))?;
        if fmt.fourcc != FourCC::new(b"MJPG") {
            return Err(CaptureError::unavailable(path, "device has no MJPEG mode"));
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CaptureError::unavailable(path, e))?;
        info!(
            "Capture stream started at {}x{} with {} buffers",
            fmt.width, fmt.height, BUFFER_COUNT
        );

        Ok(Self {
            _device: device,
            stream: Some(stream),
            path: path.to_string(),
            sequence: 0,
        })
    }
}

impl FrameSource for V4l2Capture {
    fn read_next(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::Read(format!("{}: {}", self.path, e)))?;

        // Mapped buffers are sized for the worst case
        let used = (meta.bytesused as usize).min(buf.len());
        let frame = decode_jpeg(&buf[..used], self.sequence)?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
