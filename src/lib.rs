pub mod capture;
pub mod pipeline;
pub mod services;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{Frame, PixelFormat};
pub use pipeline::{Pipeline, StopReason};
pub use services::{AnalysisResult, Behavior};

/// Prefix for environment overrides, e.g. `HOUNDWATCH__CAPTURE__TARGET_FPS=15`
pub const ENV_PREFIX: &str = "HOUNDWATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub pipeline: PipelineConfig,
    pub detector: DetectorConfig,
    pub analyzer: AnalyzerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Source used when none is given on the command line
    pub source: Option<String>,
    /// Every Nth captured frame is offered to analysis
    pub sample_interval: u64,
    /// Capture pacing; 0 reads as fast as the source delivers
    pub target_fps: u32,
    pub queue_capacity: usize,
    /// A network source silent for this long fails the run
    pub stall_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub dequeue_timeout_ms: u64,
    pub iteration_delay_ms: u64,
    /// Refresh the last-processed timestamp even when no sample arrived
    pub touch_on_idle: bool,
    pub reason_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub shutdown_timeout_ms: u64,
    /// Stack size for the capture and analysis threads, platform default when unset
    pub thread_stack_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub endpoint: String,
    /// COCO class id of the subject (16 = dog)
    pub target_class: u32,
    pub min_confidence: f32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub endpoint: String,
    pub model_id: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub source_label: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: None,
            sample_interval: 15,
            target_fps: 30,
            queue_capacity: 2,
            stall_timeout_ms: 10_000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout_ms: 1_000,
            iteration_delay_ms: 2_000,
            touch_on_idle: false,
            reason_max_chars: 100,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 2_000,
            thread_stack_size: None,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8500/detect".into(),
            target_class: 16,
            min_confidence: 0.33,
            timeout_ms: 10_000,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8600/classify".into(),
            model_id: "llama3-2-90b-instruct".into(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            source_label: "live-stream".into(),
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `HOUNDWATCH__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.sample_interval == 0 {
            return Err(ConfigError::Invalid(
                "capture.sample_interval must be at least 1".into(),
            ));
        }
        if self.capture.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "capture.queue_capacity must be at least 1".into(),
            ));
        }
        if self.capture.stall_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.stall_timeout_ms must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(ConfigError::Invalid(
                "detector.min_confidence must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

impl CaptureConfig {
    /// Pause between frames, `None` when pacing is disabled
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.target_fps > 0).then(|| Duration::from_secs_f64(1.0 / self.target_fps as f64))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl AnalysisConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }
}

impl PipelineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_pipeline() {
        let config = Config::default();
        assert_eq!(config.capture.sample_interval, 15);
        assert_eq!(config.capture.queue_capacity, 2);
        assert_eq!(config.analysis.dequeue_timeout(), Duration::from_secs(1));
        assert_eq!(config.pipeline.shutdown_timeout(), Duration::from_secs(2));
        assert!(!config.analysis.touch_on_idle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_fps_disables_pacing() {
        let mut capture = CaptureConfig::default();
        assert!(capture.frame_interval().is_some());
        capture.target_fps = 0;
        assert_eq!(capture.frame_interval(), None);
    }

    #[test]
    fn rejects_zero_sample_interval() {
        let mut config = Config::default();
        config.capture.sample_interval = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_overrides_from_toml_file() {
        let path = std::env::temp_dir().join(format!("houndwatch-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[capture]\nsample_interval = 5\n\n[analysis]\ntouch_on_idle = true\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.capture.sample_interval, 5);
        assert_eq!(config.capture.target_fps, 30);
        assert!(config.analysis.touch_on_idle);
    }
}
