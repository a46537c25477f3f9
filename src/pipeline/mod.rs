//! Capture → sample → analyse pipeline
//!
//! Two long-lived threads per run: [`CaptureLoop`] reads the source and
//! [`AnalysisLoop`] consumes samples. They share only the
//! [`SharedFrameBuffer`], the [`SampledQueue`] and the run's [`RunSignal`].

pub mod analysis_loop;
pub mod capture_loop;
pub mod controller;
pub mod ringbuf;
pub mod shared;
pub mod state;

pub use analysis_loop::{AnalysisLoop, Outcome};
pub use capture_loop::{CaptureLoop, CaptureState, CaptureSummary};
pub use controller::{Pipeline, PipelineError};
pub use ringbuf::{QueueStats, SampledQueue};
pub use shared::SharedFrameBuffer;
pub use state::{PipelineStatus, RunSignal, StopReason};
