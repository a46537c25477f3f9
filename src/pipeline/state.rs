//! Run lifecycle flag and the status the loops publish for presentation

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Local};
use flume::{Receiver, RecvTimeoutError, Sender};

use crate::services::AnalysisResult;

/// Why a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    UserRequested,
    EndOfStream,
    SourceUnavailable(String),
    ReadFailed(String),
    /// The run's threads could not be launched
    Aborted(String),
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::SourceUnavailable(_) | StopReason::ReadFailed(_) | StopReason::Aborted(_)
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UserRequested => f.write_str("stopped by request"),
            StopReason::EndOfStream => f.write_str("source reached end of stream"),
            StopReason::SourceUnavailable(e) => write!(f, "source unavailable: {}", e),
            StopReason::ReadFailed(e) => write!(f, "frame read failed: {}", e),
            StopReason::Aborted(e) => write!(f, "run aborted: {}", e),
        }
    }
}

/// Per-run `running` flag shared by the controller and both loops.
///
/// A fresh signal is created for every run, so a loop left over from a run
/// that missed its shutdown deadline can never observe the next run's flag.
/// The first recorded [`StopReason`] wins.
pub struct RunSignal {
    running: AtomicBool,
    reason: OnceLock<StopReason>,
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

impl RunSignal {
    /// A signal in the running state
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = flume::bounded(0);
        Self {
            running: AtomicBool::new(true),
            reason: OnceLock::new(),
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flip to stopped. Returns whether this call's reason was the one recorded.
    pub fn stop(&self, reason: StopReason) -> bool {
        let recorded = self.reason.set(reason).is_ok();
        self.running.store(false, Ordering::Release);
        // Dropping the only sender wakes every pending `sleep`
        self.wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        recorded
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.reason.get().cloned()
    }

    /// Sleep for `duration` or until stopped. Returns whether still running.
    pub fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.wake_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_running(),
            _ => false,
        }
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Values the loops publish and the presentation layer reads
#[derive(Default)]
pub struct PipelineStatus {
    frames_captured: AtomicU64,
    last_processed: ArcSwapOption<DateTime<Local>>,
    classification: ArcSwapOption<AnalysisResult>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_count(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Mark an analysis iteration as completed now
    pub fn touch(&self) {
        self.last_processed.store(Some(Arc::new(Local::now())));
    }

    pub fn last_processed_at(&self) -> Option<DateTime<Local>> {
        self.last_processed.load_full().map(|ts| *ts)
    }

    pub fn set_classification(&self, result: AnalysisResult) {
        self.classification.store(Some(Arc::new(result)));
    }

    pub fn classification(&self) -> Option<AnalysisResult> {
        self.classification
            .load_full()
            .map(|result| (*result).clone())
    }

    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.last_processed.store(None);
        self.classification.store(None);
    }
}
