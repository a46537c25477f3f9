use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::capture::Frame;

/// Latest captured frame for readers outside the pipeline.
///
/// Writes are a single pointer swap, so the capture thread never waits on a
/// reader, and readers only ever see a fully written frame.
#[derive(Default)]
pub struct SharedFrameBuffer {
    latest: ArcSwapOption<Frame>,
}

impl SharedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, frame: Frame) {
        self.latest.store(Some(Arc::new(frame)));
    }

    pub fn read(&self) -> Option<Frame> {
        self.latest.load_full().map(|frame| (*frame).clone())
    }

    pub fn clear(&self) {
        self.latest.store(None);
    }
}
