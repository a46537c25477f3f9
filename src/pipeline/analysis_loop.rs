use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ringbuf::SampledQueue;
use super::state::{PipelineStatus, RunSignal};
use crate::capture::Frame;
use crate::services::{AnalysisResult, ErrorKind, Services};
use crate::AnalysisConfig;

/// Result of a single analysis iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No sample arrived before the dequeue timeout
    Idle,
    /// Sample analysed, subject not present
    Absent,
    /// Subject present; the result was published and handed to the store
    Classified(AnalysisResult),
}

/// Drains samples and runs detection, classification and storage on them
pub struct AnalysisLoop {
    queue: Arc<SampledQueue>,
    signal: Arc<RunSignal>,
    status: Arc<PipelineStatus>,
    services: Services,
    config: AnalysisConfig,
}

impl AnalysisLoop {
    pub fn new(
        queue: Arc<SampledQueue>,
        signal: Arc<RunSignal>,
        status: Arc<PipelineStatus>,
        services: Services,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            queue,
            signal,
            status,
            services,
            config,
        }
    }

    /// Loop until the run stops, then hand the collaborators back
    pub fn run(mut self) -> Services {
        info!("Analysis loop started");

        while self.signal.is_running() {
            if self.step() == Outcome::Idle {
                continue;
            }
            self.signal.sleep(self.config.iteration_delay());
        }

        info!("Analysis loop exited");
        self.services
    }

    /// Give the collaborators back without running
    pub fn into_services(self) -> Services {
        self.services
    }

    pub fn step(&mut self) -> Outcome {
        let Some(frame) = self.queue.take(self.config.dequeue_timeout()) else {
            if self.config.touch_on_idle {
                self.status.touch();
            }
            return Outcome::Idle;
        };

        let outcome = if self.detect(&frame) {
            let result = self.classify(&frame);
            self.status.set_classification(result.clone());
            self.persist(&frame, &result);
            Outcome::Classified(result)
        } else {
            Outcome::Absent
        };

        self.status.touch();
        outcome
    }

    fn detect(&mut self, frame: &Frame) -> bool {
        match self.services.detector.detect(frame) {
            Ok(present) => {
                debug!(frame = frame.sequence(), present, "Detection");
                if present {
                    metrics::counter!("detections_total").increment(1);
                }
                present
            }
            Err(e) => {
                warn!(frame = frame.sequence(), "Detection failed, treating as absent: {}", e);
                metrics::counter!("detection_failures_total").increment(1);
                false
            }
        }
    }

    fn classify(&mut self, frame: &Frame) -> AnalysisResult {
        let max_chars = self.config.reason_max_chars;
        let result = match self.services.analyzer.analyze(frame) {
            Ok(result) => result.clamp_reason(max_chars),
            Err(e) => {
                warn!(frame = frame.sequence(), "Classification failed: {}", e);
                AnalysisResult::from_failure(&e, max_chars)
            }
        };

        info!(
            frame = frame.sequence(),
            classification = %result.classification,
            reason = %result.reason,
            "Classified"
        );
        metrics::counter!("classifications_total", "label" => result.classification.as_str())
            .increment(1);
        result
    }

    fn persist(&mut self, frame: &Frame, result: &AnalysisResult) {
        if let Err(e) = self.services.store.save(frame, result) {
            warn!(frame = frame.sequence(), "Failed to store result: {}", e);
            metrics::counter!("storage_failures_total").increment(1);
            self.services
                .store
                .record_error(ErrorKind::Storage, &e.to_string());
        }
    }
}
