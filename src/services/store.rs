//! Local persistence: PNG frames plus an append-only JSON-lines ledger

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use super::{AnalysisResult, Behavior, ErrorKind, StorageError, Store};
use crate::capture::Frame;
use crate::utils::truncate_chars;
use crate::StoreConfig;

pub const FRAMES_DIR: &str = "frames";
pub const LEDGER_FILE: &str = "results.jsonl";
const ERROR_MESSAGE_MAX_CHARS: usize = 500;

#[derive(Debug, Serialize)]
struct ResultRecord<'a> {
    frame_id: String,
    frame_path: String,
    classification: Behavior,
    reason: &'a str,
    timestamp: DateTime<Local>,
    metadata: ResultMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct ResultMetadata<'a> {
    source: &'a str,
    frame_sequence: u64,
    captured_at: DateTime<Local>,
    processing_time: DateTime<Local>,
}

#[derive(Debug, Serialize)]
struct ErrorRecord<'a> {
    frame_id: String,
    error_type: &'static str,
    message: String,
    timestamp: DateTime<Local>,
    metadata: ErrorMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorMetadata<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

pub struct FileStore {
    root: PathBuf,
    source_label: String,
    ledger: Option<BufWriter<File>>,
}

impl FileStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            root: config.root.clone(),
            source_label: config.source_label.clone(),
            ledger: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ledger(&mut self) -> Result<&mut BufWriter<File>, StorageError> {
        if self.ledger.is_none() {
            std::fs::create_dir_all(self.root.join(FRAMES_DIR))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.root.join(LEDGER_FILE))?;
            debug!("Opened ledger under {}", self.root.display());
            self.ledger = Some(BufWriter::new(file));
        }
        self.ledger
            .as_mut()
            .ok_or_else(|| StorageError::Rejected("ledger unavailable".into()))
    }

    fn append<T: Serialize>(&mut self, record: &T) -> Result<(), StorageError> {
        let ledger = self.ledger()?;
        serde_json::to_writer(&mut *ledger, record)?;
        ledger.write_all(b"\n")?;
        ledger.flush()?;
        Ok(())
    }
}

impl Store for FileStore {
    fn save(&mut self, frame: &Frame, result: &AnalysisResult) -> Result<(), StorageError> {
        // Make sure the directories exist before writing the image
        self.ledger()?;

        let now = Local::now();
        let key = format!(
            "{}/{}-{}.png",
            FRAMES_DIR,
            now.format("%Y%m%d-%H%M%S"),
            Uuid::new_v4().simple()
        );
        std::fs::write(self.root.join(&key), frame.encode_png()?)?;

        let source = self.source_label.clone();
        let record = ResultRecord {
            frame_id: Uuid::new_v4().to_string(),
            frame_path: key,
            classification: result.classification,
            reason: &result.reason,
            timestamp: now,
            metadata: ResultMetadata {
                source: &source,
                frame_sequence: frame.sequence(),
                captured_at: frame.captured_at,
                processing_time: Local::now(),
            },
        };
        self.append(&record)
    }

    fn record_error(&mut self, kind: ErrorKind, message: &str) {
        let record = ErrorRecord {
            frame_id: Uuid::new_v4().to_string(),
            error_type: kind.as_str(),
            message: truncate_chars(message, ERROR_MESSAGE_MAX_CHARS),
            timestamp: Local::now(),
            metadata: ErrorMetadata { kind: "error" },
        };
        if let Err(e) = self.append(&record) {
            error!("Critical error logging failure: {}", e);
        }
    }

    fn close(&mut self) {
        if let Some(mut ledger) = self.ledger.take() {
            if let Err(e) = ledger.flush() {
                error!("Failed to flush ledger on close: {}", e);
            }
        }
    }
}
