use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use houndwatch::capture::{CaptureError, Frame, FrameSource, SourceOpener};
use houndwatch::pipeline::{Pipeline, PipelineError, StopReason};
use houndwatch::services::{
    parse_model_output, AnalysisResult, Analyzer, Behavior, ClassificationError, DetectionError,
    Detector, ErrorKind, Services, StorageError, Store,
};
use houndwatch::{Config, PixelFormat};

/// Yields `limit` frames (or forever) then end-of-stream
struct CountingSource {
    next: u64,
    limit: Option<u64>,
}

impl FrameSource for CountingSource {
    fn read_next(&mut self) -> Result<Option<Frame>, CaptureError> {
        if Some(self.next) == self.limit {
            return Ok(None);
        }
        let frame = Frame::new(self.next, 4, 4, PixelFormat::Rgb24, vec![90u8; 48])?;
        self.next += 1;
        Ok(Some(frame))
    }
}

struct Opener {
    limit: Option<u64>,
}

impl SourceOpener for Opener {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>, CaptureError> {
        if identifier.starts_with("offline") {
            return Err(CaptureError::unavailable(identifier, "connection refused"));
        }
        Ok(Box::new(CountingSource {
            next: 0,
            limit: self.limit,
        }))
    }
}

#[derive(Default)]
struct Journal {
    detections: AtomicUsize,
    analyses: AtomicUsize,
    closes: AtomicUsize,
    saved: Mutex<Vec<AnalysisResult>>,
    errors: Mutex<Vec<ErrorKind>>,
}

struct Detect(Arc<Journal>, bool);
/// Detector whose calls outlast the shutdown deadline
struct SlowDetect(Arc<Journal>, Duration);
struct Analyze(Arc<Journal>, &'static str);
struct Persist(Arc<Journal>, bool);

impl Detector for Detect {
    fn detect(&mut self, _: &Frame) -> Result<bool, DetectionError> {
        self.0.detections.fetch_add(1, Ordering::SeqCst);
        Ok(self.1)
    }

    fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Detector for SlowDetect {
    fn detect(&mut self, _: &Frame) -> Result<bool, DetectionError> {
        self.0.detections.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.1);
        Ok(false)
    }

    fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Analyzer for Analyze {
    fn analyze(&mut self, _: &Frame) -> Result<AnalysisResult, ClassificationError> {
        self.0.analyses.fetch_add(1, Ordering::SeqCst);
        parse_model_output(self.1)
    }

    fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Store for Persist {
    fn save(&mut self, _: &Frame, result: &AnalysisResult) -> Result<(), StorageError> {
        if self.1 {
            return Err(StorageError::Rejected("table unavailable".into()));
        }
        self.0.saved.lock().unwrap().push(result.clone());
        Ok(())
    }

    fn record_error(&mut self, kind: ErrorKind, _: &str) {
        self.0.errors.lock().unwrap().push(kind);
    }

    fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

const SLEEPING: &str = r#"{"classification": "sleeping", "reason": "Lying down, eyes shut"}"#;

fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.target_fps = 500;
    config.analysis.dequeue_timeout_ms = 50;
    config.analysis.iteration_delay_ms = 0;
    config
}

fn pipeline(
    limit: Option<u64>,
    present: bool,
    answer: &'static str,
    store_fails: bool,
) -> (Pipeline, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let services = Services::new(
        Detect(Arc::clone(&journal), present),
        Analyze(Arc::clone(&journal), answer),
        Persist(Arc::clone(&journal), store_fails),
    );
    (
        Pipeline::new(test_config(), Opener { limit }, services),
        journal,
    )
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn running_flag_follows_start_and_stop() {
    let (mut pipeline, journal) = pipeline(None, false, SLEEPING, false);

    assert!(!pipeline.is_running());
    pipeline.start("yard-cam").unwrap();
    assert!(pipeline.is_running());

    assert!(wait_until(Duration::from_secs(2), || pipeline.frame_count() > 0));
    assert!(pipeline.latest().0.is_some());

    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.stop_reason(), Some(StopReason::UserRequested));
    assert_eq!(journal.closes.load(Ordering::SeqCst), 3);
}

#[test]
fn stop_is_idempotent() {
    let (mut pipeline, journal) = pipeline(None, false, SLEEPING, false);
    pipeline.stop();
    assert!(!pipeline.is_running());
    assert_eq!(journal.closes.load(Ordering::SeqCst), 0);

    pipeline.start("yard-cam").unwrap();
    pipeline.stop();
    let reason = pipeline.stop_reason();
    let closes = journal.closes.load(Ordering::SeqCst);

    pipeline.stop();
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.stop_reason(), reason);
    assert_eq!(journal.closes.load(Ordering::SeqCst), closes);
}

#[test]
fn start_while_running_is_a_no_op() {
    let (mut pipeline, _journal) = pipeline(None, false, SLEEPING, false);
    pipeline.start("yard-cam").unwrap();
    pipeline.start("another-cam").unwrap();
    assert!(pipeline.is_running());
    pipeline.stop();
}

#[test]
fn thirty_frame_clip_yields_two_samples_and_stops() {
    let (mut pipeline, journal) = pipeline(Some(30), true, SLEEPING, false);
    pipeline.start("clip.mjpeg").unwrap();

    assert!(wait_until(Duration::from_secs(2), || !pipeline.is_running()));
    assert_eq!(pipeline.stop_reason(), Some(StopReason::EndOfStream));
    assert_eq!(pipeline.frame_count(), 30);
    assert_eq!(pipeline.queue_stats().map(|s| s.offered), Some(2));

    // The analysis loop notices within one dequeue timeout, so teardown is quick
    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(pipeline.stop_reason(), Some(StopReason::EndOfStream));
    assert!(journal.saved.lock().unwrap().len() <= 2);
}

#[test]
fn unavailable_source_ends_the_run() {
    let (mut pipeline, journal) = pipeline(None, true, SLEEPING, false);
    pipeline.start("offline-cam").unwrap();

    assert!(wait_until(Duration::from_secs(2), || !pipeline.is_running()));
    assert!(matches!(
        pipeline.stop_reason(),
        Some(StopReason::SourceUnavailable(_))
    ));
    assert_eq!(pipeline.frame_count(), 0);
    pipeline.stop();
    assert_eq!(journal.detections.load(Ordering::SeqCst), 0);
}

#[test]
fn absent_subject_never_reaches_analyzer_or_store() {
    let (mut pipeline, journal) = pipeline(None, false, SLEEPING, false);
    pipeline.start("yard-cam").unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        journal.detections.load(Ordering::SeqCst) >= 2
    }));
    pipeline.stop();

    assert_eq!(journal.analyses.load(Ordering::SeqCst), 0);
    assert!(journal.saved.lock().unwrap().is_empty());
    assert!(pipeline.last_processed_at().is_some());
    assert!(pipeline.latest().1.is_none());
}

#[test]
fn malformed_answers_are_stored_as_sentinels() {
    let (mut pipeline, journal) = pipeline(None, true, "I think it is napping", false);
    pipeline.start("yard-cam").unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        !journal.saved.lock().unwrap().is_empty()
    }));
    pipeline.stop();

    let saved = journal.saved.lock().unwrap();
    assert_eq!(saved[0].classification, Behavior::Other);
    assert_eq!(saved[0].reason, "Response parsing failed");
    assert_eq!(pipeline.latest().1, Some(AnalysisResult::parse_failure()));
}

#[test]
fn storage_failures_do_not_stop_analysis() {
    let (mut pipeline, journal) = pipeline(None, true, SLEEPING, true);
    pipeline.start("yard-cam").unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        journal.analyses.load(Ordering::SeqCst) >= 3
    }));
    assert!(pipeline.is_running());
    pipeline.stop();

    let errors = journal.errors.lock().unwrap();
    assert!(errors.len() >= 3);
    assert!(errors.iter().all(|kind| *kind == ErrorKind::Storage));
    assert_eq!(
        pipeline.latest().1.map(|r| r.classification),
        Some(Behavior::Sleeping)
    );
}

#[test]
fn pipeline_can_be_restarted() {
    let (mut pipeline, journal) = pipeline(Some(30), true, SLEEPING, false);
    pipeline.start("clip.mjpeg").unwrap();
    assert!(wait_until(Duration::from_secs(2), || !pipeline.is_running()));

    // A finished run is reaped by the next start
    pipeline.start("clip.mjpeg").unwrap();
    assert!(wait_until(Duration::from_secs(2), || !pipeline.is_running()));
    assert_eq!(pipeline.frame_count(), 30);
    pipeline.stop();
    assert!(journal.closes.load(Ordering::SeqCst) >= 3);
}

#[test]
fn collaborators_are_released_when_a_slow_call_misses_the_deadline() {
    let journal = Arc::new(Journal::default());
    let services = Services::new(
        SlowDetect(Arc::clone(&journal), Duration::from_millis(1_500)),
        Analyze(Arc::clone(&journal), SLEEPING),
        Persist(Arc::clone(&journal), false),
    );
    let mut config = test_config();
    config.pipeline.shutdown_timeout_ms = 200;
    let mut pipeline = Pipeline::new(config, Opener { limit: None }, services);

    pipeline.start("yard-cam").unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        journal.detections.load(Ordering::SeqCst) > 0
    }));

    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!pipeline.is_running());
    assert_eq!(journal.closes.load(Ordering::SeqCst), 0);

    // The analysis thread still holds the collaborators
    assert!(matches!(
        pipeline.start("yard-cam"),
        Err(PipelineError::ServicesBusy)
    ));
    assert!(!pipeline.is_running());

    // Released by the analysis thread once the in-flight call returns
    assert!(wait_until(Duration::from_secs(3), || {
        journal.closes.load(Ordering::SeqCst) == 3
    }));

    // Handed back right after the release
    assert!(wait_until(Duration::from_secs(1), || pipeline
        .start("yard-cam")
        .is_ok()));
    assert!(pipeline.is_running());
    pipeline.stop();
}
