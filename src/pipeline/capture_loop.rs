use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::ringbuf::SampledQueue;
use super::shared::SharedFrameBuffer;
use super::state::{PipelineStatus, RunSignal, StopReason};
use crate::capture::SourceOpener;
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Starting,
    Capturing,
    Stopped,
}

/// What one capture run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: u64,
    pub samples: u64,
}

/// Reads the source, publishes every frame and samples every Nth one
pub struct CaptureLoop {
    opener: Arc<dyn SourceOpener>,
    identifier: String,
    frames: Arc<SharedFrameBuffer>,
    queue: Arc<SampledQueue>,
    signal: Arc<RunSignal>,
    status: Arc<PipelineStatus>,
    sample_interval: u64,
    frame_interval: Option<Duration>,
}

impl CaptureLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        identifier: impl Into<String>,
        frames: Arc<SharedFrameBuffer>,
        queue: Arc<SampledQueue>,
        signal: Arc<RunSignal>,
        status: Arc<PipelineStatus>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            opener,
            identifier: identifier.into(),
            frames,
            queue,
            signal,
            status,
            sample_interval: config.sample_interval.max(1),
            frame_interval: config.frame_interval(),
        }
    }

    pub fn run(self) -> CaptureSummary {
        let mut state = CaptureState::Starting;
        debug!(?state, source = %self.identifier, "Capture loop starting");

        let mut source = match self.opener.open(&self.identifier) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open source {}: {}", self.identifier, e);
                self.signal.stop(StopReason::SourceUnavailable(e.to_string()));
                return CaptureSummary::default();
            }
        };

        state = CaptureState::Capturing;
        info!(?state, source = %self.identifier, "Capturing");

        let mut summary = CaptureSummary::default();
        // Owned by this loop alone; decides which frames become samples
        let mut sample_counter: u64 = 0;

        let reason = loop {
            if !self.signal.is_running() {
                break None;
            }
            let frame_started = Instant::now();

            let frame = match source.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Some(StopReason::EndOfStream),
                Err(e) => {
                    warn!("Capture error on {}: {}", self.identifier, e);
                    break Some(StopReason::ReadFailed(e.to_string()));
                }
            };

            self.frames.write(frame.clone());
            self.status.record_frame();
            summary.frames += 1;
            metrics::counter!("frames_captured_total").increment(1);

            sample_counter += 1;
            if sample_counter % self.sample_interval == 0 {
                if let Some(evicted) = self.queue.offer(frame) {
                    debug!(frame = evicted.sequence(), "Dropped stale sample");
                    metrics::counter!("samples_dropped_total").increment(1);
                }
                summary.samples += 1;
                metrics::counter!("samples_offered_total").increment(1);
            }

            if let Some(interval) = self.frame_interval {
                self.signal
                    .sleep(interval.saturating_sub(frame_started.elapsed()));
            }
        };

        state = CaptureState::Stopped;
        if let Some(reason) = reason {
            self.signal.stop(reason);
        }
        source.close();

        info!(
            ?state,
            frames = summary.frames,
            samples = summary.samples,
            reason = ?self.signal.stop_reason(),
            "Capture loop exited"
        );
        summary
    }
}
