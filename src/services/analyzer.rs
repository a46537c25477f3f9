use std::time::{Duration, Instant};

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use super::result::parse_model_output;
use super::{AnalysisResult, Analyzer, ClassificationError};
use crate::capture::Frame;
use crate::AnalyzerConfig;

pub const PROMPT: &str = "Analyze this dog image and classify its posture/action strictly as one of: \
barking, eating, drinking, sleeping, standing, or other. \
Return JSON format: {\"classification\": \"<label>\", \"reason\": \"<short reason in 100 chars>\"}";

#[derive(Debug, Deserialize)]
struct ModelReply {
    text: String,
}

/// Behaviour classifier backed by a multimodal model endpoint
pub struct HttpAnalyzer {
    config: AnalyzerConfig,
    client: Option<Client>,
}

impl HttpAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&Client, ClassificationError> {
        if self.client.is_none() {
            let client = Client::builder()
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .build()
                .map_err(|e| ClassificationError::Service(e.to_string()))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| ClassificationError::Service("client unavailable".into()))
    }
}

impl Analyzer for HttpAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<AnalysisResult, ClassificationError> {
        let started = Instant::now();
        let image = Part::bytes(frame.encode_png()?)
            .file_name("frame.png")
            .mime_str("image/png")
            .map_err(|e| ClassificationError::Service(e.to_string()))?;
        let form = Form::new()
            .text("model", self.config.model_id.clone())
            .text("prompt", PROMPT)
            .part("image", image);
        let endpoint = self.config.endpoint.clone();

        let reply: ModelReply = self
            .client()?
            .post(&endpoint)
            .multipart(form)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| ClassificationError::Service(e.to_string()))?;

        metrics::histogram!("analysis_latency_ms").record(started.elapsed().as_millis() as f64);
        debug!(frame = frame.sequence(), reply = %reply.text, "Model reply");

        parse_model_output(&reply.text)
    }

    fn close(&mut self) {
        self.client = None;
    }
}
