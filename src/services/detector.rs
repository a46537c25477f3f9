use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::trace;

use super::{DetectionError, Detector};
use crate::capture::Frame;
use crate::DetectorConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Object detector served over HTTP: PNG in, `{"detections": [...]}` out
pub struct HttpDetector {
    config: DetectorConfig,
    client: Option<Client>,
}

impl HttpDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&Client, DetectionError> {
        if self.client.is_none() {
            let client = Client::builder()
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .build()
                .map_err(|e| DetectionError::Request(e.to_string()))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| DetectionError::Request("client unavailable".into()))
    }
}

impl Detector for HttpDetector {
    fn detect(&mut self, frame: &Frame) -> Result<bool, DetectionError> {
        let started = Instant::now();
        let png = frame.encode_png()?;
        let endpoint = self.config.endpoint.clone();

        let response: DetectionResponse = self
            .client()?
            .post(&endpoint)
            .header(CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| DetectionError::Request(e.to_string()))?
            .json()
            .map_err(|e| DetectionError::Response(e.to_string()))?;

        metrics::histogram!("detection_latency_ms").record(started.elapsed().as_millis() as f64);
        trace!(
            frame = frame.sequence(),
            detections = response.detections.len(),
            "Detection response"
        );

        Ok(subject_present(
            &response.detections,
            self.config.target_class,
            self.config.min_confidence,
        ))
    }

    fn close(&mut self) {
        self.client = None;
    }
}

pub fn subject_present(detections: &[Detection], target_class: u32, min_confidence: f32) -> bool {
    detections
        .iter()
        .any(|d| d.class_id == target_class && d.confidence >= min_confidence)
}
