use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::{DateTime, Local};
use flume::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::analysis_loop::AnalysisLoop;
use super::capture_loop::{CaptureLoop, CaptureSummary};
use super::ringbuf::{QueueStats, SampledQueue};
use super::shared::SharedFrameBuffer;
use super::state::{PipelineStatus, RunSignal, StopReason};
use crate::capture::{DefaultSourceOpener, Frame, SourceOpener};
use crate::services::{AnalysisResult, Services};
use crate::Config;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("collaborators are still held by a previous run that has not exited")]
    ServicesBusy,
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
}

/// Handles of the run currently owning the loops
struct ActiveRun {
    queue: Arc<SampledQueue>,
    capture: Option<JoinHandle<CaptureSummary>>,
    analysis: JoinHandle<()>,
    /// Disconnects once both loop threads have exited
    exits: Receiver<()>,
}

/// Owns the capture and analysis loops for start-to-stop runs
pub struct Pipeline {
    config: Config,
    opener: Arc<dyn SourceOpener>,
    frames: Arc<SharedFrameBuffer>,
    status: Arc<PipelineStatus>,
    services: Option<Services>,
    services_tx: Sender<Services>,
    services_rx: Receiver<Services>,
    signal: Option<Arc<RunSignal>>,
    run: Option<ActiveRun>,
}

impl Pipeline {
    pub fn new(config: Config, opener: impl SourceOpener + 'static, services: Services) -> Self {
        let (services_tx, services_rx) = flume::unbounded();
        Self {
            config,
            opener: Arc::new(opener),
            frames: Arc::new(SharedFrameBuffer::new()),
            status: Arc::new(PipelineStatus::new()),
            services: Some(services),
            services_tx,
            services_rx,
            signal: None,
            run: None,
        }
    }

    /// Pipeline reading from the built-in capture backends
    pub fn with_default_sources(config: Config, services: Services) -> Self {
        let opener = DefaultSourceOpener::new(&config.capture);
        Self::new(config, opener, services)
    }

    /// Launch capture and analysis for `identifier`. No-op while running.
    pub fn start(&mut self, identifier: &str) -> Result<(), PipelineError> {
        if self.is_running() {
            debug!("Pipeline already running, ignoring start for {}", identifier);
            return Ok(());
        }

        // Reap a run that ended on its own
        if let Some(run) = self.run.take() {
            self.finish(run);
        }

        let services = self
            .services
            .take()
            .or_else(|| self.services_rx.try_recv().ok())
            .ok_or(PipelineError::ServicesBusy)?;

        self.status.reset();
        self.frames.clear();

        let signal = Arc::new(RunSignal::new());
        let queue = Arc::new(SampledQueue::new(self.config.capture.queue_capacity));
        self.signal = Some(Arc::clone(&signal));
        info!("Starting pipeline on {}", identifier);

        let (exit_tx, exits) = flume::bounded::<()>(0);

        // The loop is handed over only once the thread exists, so a failed
        // spawn leaves the collaborators with the controller
        let (handoff_tx, handoff_rx) = flume::bounded::<AnalysisLoop>(1);
        let services_tx = self.services_tx.clone();
        let analysis_exit = exit_tx.clone();
        let analysis = self
            .thread_builder("analysis")
            .spawn(move || {
                let _exit = analysis_exit;
                let Ok(analysis) = handoff_rx.recv() else {
                    return;
                };
                let mut services = analysis.run();
                // Released here so a loop that outlived its stop deadline still frees them
                services.release();
                if services_tx.send(services).is_err() {
                    debug!("Controller gone, dropping released collaborators");
                }
            });
        let analysis = match analysis {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn analysis thread: {}", e);
                signal.stop(StopReason::Aborted(e.to_string()));
                self.services = Some(services);
                return Err(PipelineError::Spawn("analysis", e));
            }
        };

        let analysis_loop = AnalysisLoop::new(
            Arc::clone(&queue),
            Arc::clone(&signal),
            Arc::clone(&self.status),
            services,
            self.config.analysis.clone(),
        );
        if let Err(returned) = handoff_tx.send(analysis_loop) {
            // Thread died before receiving; keep the collaborators
            self.services = Some(returned.into_inner().into_services());
        }

        let capture = CaptureLoop::new(
            Arc::clone(&self.opener),
            identifier,
            Arc::clone(&self.frames),
            Arc::clone(&queue),
            Arc::clone(&signal),
            Arc::clone(&self.status),
            &self.config.capture,
        );
        let capture = self
            .thread_builder("capture")
            .spawn(move || {
                let _exit = exit_tx;
                capture.run()
            });

        match capture {
            Ok(capture) => {
                self.run = Some(ActiveRun {
                    queue,
                    capture: Some(capture),
                    analysis,
                    exits,
                });
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn capture thread: {}", e);
                signal.stop(StopReason::Aborted(e.to_string()));
                self.run = Some(ActiveRun {
                    queue,
                    capture: None,
                    analysis,
                    exits,
                });
                Err(PipelineError::Spawn("capture", e))
            }
        }
    }

    fn thread_builder(&self, name: &str) -> thread::Builder {
        let builder = thread::Builder::new().name(name.into());
        match self.config.pipeline.thread_stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }

    /// Stop the current run and release collaborator resources. Idempotent.
    pub fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        if let Some(signal) = &self.signal {
            if signal.stop(StopReason::UserRequested) {
                info!("Stop requested");
            }
        }
        self.finish(run);
    }

    fn finish(&mut self, run: ActiveRun) {
        let timeout = self.config.pipeline.shutdown_timeout();
        let deadline = Instant::now() + timeout;

        match run.exits.recv_deadline(deadline) {
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(capture) = run.capture {
                    match capture.join() {
                        Ok(summary) => debug!(
                            frames = summary.frames,
                            samples = summary.samples,
                            "Capture thread joined"
                        ),
                        Err(_) => error!("Capture thread panicked"),
                    }
                }
                if run.analysis.join().is_err() {
                    error!("Analysis thread panicked");
                }
            }
            _ => warn!(
                "Pipeline loops did not exit within {:?}, continuing teardown",
                timeout
            ),
        }

        match self.services_rx.try_recv() {
            Ok(services) => self.services = Some(services),
            Err(_) if self.services.is_some() => {}
            Err(_) => warn!(
                "Collaborators still busy in the analysis thread; they are released when it exits"
            ),
        }

        let drained = run.queue.clear();
        let stats = run.queue.stats();
        info!(
            drained,
            offered = stats.offered,
            dropped = stats.dropped,
            reason = ?self.stop_reason(),
            "Pipeline stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.signal
            .as_ref()
            .map(|signal| signal.is_running())
            .unwrap_or(false)
    }

    /// Why the latest run ended, `None` while it is running or before any run
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.signal.as_ref().and_then(|signal| signal.stop_reason())
    }

    /// Latest frame and current classification for display
    pub fn latest(&self) -> (Option<Frame>, Option<AnalysisResult>) {
        (self.frames.read(), self.status.classification())
    }

    pub fn frame_count(&self) -> u64 {
        self.status.frame_count()
    }

    pub fn last_processed_at(&self) -> Option<DateTime<Local>> {
        self.status.last_processed_at()
    }

    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.run.as_ref().map(|run| run.queue.stats())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
