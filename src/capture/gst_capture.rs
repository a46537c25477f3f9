//! GStreamer-based capture for RTSP streams and container files

use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument};

use super::{CaptureError, Frame, FrameSource, PixelFormat};

/// Decodes any URI GStreamer understands into packed RGB frames
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    uri: String,
    sequence: u64,
}

impl GstCapture {
    #[instrument]
    pub fn open(identifier: &str) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::unavailable(identifier, e))?;

        let uri = Self::to_uri(identifier)?;
        let pipeline_str = Self::build_pipeline_string(&uri);
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| CaptureError::unavailable(identifier, e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::unavailable(identifier, "not a pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CaptureError::unavailable(identifier, "missing appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::unavailable(identifier, "appsink has wrong type"))?;

        // Live sources drop stale buffers rather than queueing behind a slow reader
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 3u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        let mut capture = Self {
            pipeline,
            appsink,
            uri,
            sequence: 0,
        };
        capture.start_stream(identifier)?;
        Ok(capture)
    }

    fn to_uri(identifier: &str) -> Result<String, CaptureError> {
        if identifier.contains("://") {
            return Ok(identifier.to_string());
        }
        let path = Path::new(identifier)
            .canonicalize()
            .map_err(|e| CaptureError::unavailable(identifier, e))?;
        Ok(format!("file://{}", path.display()))
    }

    fn build_pipeline_string(uri: &str) -> String {
        format!(
            "uridecodebin uri=\"{}\" ! \
             queue max-size-buffers=2 leaky=downstream ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=appsink",
            uri
        )
    }

    fn start_stream(&mut self, identifier: &str) -> Result<(), CaptureError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::unavailable(identifier, format!("{:?}", e)))?;

        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!("Pipeline started");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) => {
                debug!("Pipeline starting asynchronously");
                Ok(())
            }
            Err(e) => Err(CaptureError::unavailable(identifier, format!("{:?}", e))),
        }
    }

    fn stop_stream(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl FrameSource for GstCapture {
    fn read_next(&mut self) -> Result<Option<Frame>, CaptureError> {
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) if self.appsink.is_eos() => return Ok(None),
            Err(e) => return Err(CaptureError::Read(format!("{}: {}", self.uri, e))),
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Read("sample contains no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::Read("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| CaptureError::Read(format!("unreadable caps: {}", e)))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Read("failed to map buffer".into()))?;

        // RGB rows are padded to 4-byte strides; repack them tightly
        let width = info.width();
        let height = info.height();
        let row = width as usize * 3;
        let stride = info.stride()[0] as usize;
        let mut data = Vec::with_capacity(row * height as usize);
        for line in map.as_slice().chunks(stride).take(height as usize) {
            data.extend_from_slice(&line[..row.min(line.len())]);
        }

        let frame = Frame::new(self.sequence, width, height, PixelFormat::Rgb24, data)?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.stop_stream();
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
