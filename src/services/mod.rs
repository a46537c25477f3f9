//! Collaborators behind the analysis loop: detection, classification, storage
//!
//! Every call returns an explicit error type. The analysis loop converts those
//! errors into safe defaults at its call sites, so nothing here may panic or
//! block indefinitely on a dead service.

pub mod analyzer;
pub mod detector;
pub mod result;
pub mod store;

use thiserror::Error;
use tracing::debug;

use crate::capture::{Frame, FrameError};

pub use analyzer::HttpAnalyzer;
pub use detector::HttpDetector;
pub use result::{parse_model_output, AnalysisResult, Behavior};
pub use store::FileStore;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detection request failed: {0}")]
    Request(String),
    #[error("detection response unreadable: {0}")]
    Response(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classification service failed: {0}")]
    Service(String),
    #[error("model response could not be parsed: {0}")]
    Malformed(String),
    #[error("model answered with unknown label {0:?}")]
    InvalidLabel(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("storage backend rejected the record: {0}")]
    Rejected(String),
}

/// Category attached to records written through [`Store::record_error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    Classification,
    Detection,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Storage => "StorageError",
            ErrorKind::Classification => "ClassificationError",
            ErrorKind::Detection => "DetectionError",
        }
    }
}

/// Answers whether the subject is in the frame
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<bool, DetectionError>;

    fn close(&mut self) {}
}

/// Classifies the subject's behaviour
pub trait Analyzer: Send {
    fn analyze(&mut self, frame: &Frame) -> Result<AnalysisResult, ClassificationError>;

    fn close(&mut self) {}
}

/// Durable sink for classified frames
pub trait Store: Send {
    fn save(&mut self, frame: &Frame, result: &AnalysisResult) -> Result<(), StorageError>;

    /// Report a failure through the store's own error channel. Never fails outward.
    fn record_error(&mut self, kind: ErrorKind, message: &str);

    fn close(&mut self) {}
}

/// The three collaborators, moved as one unit between controller and analysis loop
pub struct Services {
    pub detector: Box<dyn Detector>,
    pub analyzer: Box<dyn Analyzer>,
    pub store: Box<dyn Store>,
}

impl Services {
    pub fn new(
        detector: impl Detector + 'static,
        analyzer: impl Analyzer + 'static,
        store: impl Store + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            analyzer: Box::new(analyzer),
            store: Box::new(store),
        }
    }

    /// Release held resources; collaborators reacquire them on next use
    pub fn release(&mut self) {
        debug!("Releasing detector, analyzer and store resources");
        self.detector.close();
        self.analyzer.close();
        self.store.close();
    }
}
