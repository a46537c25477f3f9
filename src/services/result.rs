use std::fmt;

use serde::{Deserialize, Serialize};

use super::ClassificationError;
use crate::utils::truncate_chars;

pub const PARSE_FAILED_REASON: &str = "Response parsing failed";
pub const INVALID_RESPONSE_REASON: &str = "Invalid model response";

/// Behaviour label; `Error` only ever comes from a failed classification call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Barking,
    Eating,
    Drinking,
    Sleeping,
    Standing,
    Other,
    Error,
}

impl Behavior {
    /// Labels the classification model may answer with
    pub const MODEL_LABELS: [Behavior; 6] = [
        Behavior::Barking,
        Behavior::Eating,
        Behavior::Drinking,
        Behavior::Sleeping,
        Behavior::Standing,
        Behavior::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Behavior::Barking => "barking",
            Behavior::Eating => "eating",
            Behavior::Drinking => "drinking",
            Behavior::Sleeping => "sleeping",
            Behavior::Standing => "standing",
            Behavior::Other => "other",
            Behavior::Error => "error",
        }
    }

    pub fn from_model_label(label: &str) -> Option<Self> {
        Self::MODEL_LABELS
            .into_iter()
            .find(|behavior| behavior.as_str() == label)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub classification: Behavior,
    pub reason: String,
}

impl AnalysisResult {
    pub fn new(classification: Behavior, reason: impl Into<String>) -> Self {
        Self {
            classification,
            reason: reason.into(),
        }
    }

    pub fn parse_failure() -> Self {
        Self::new(Behavior::Other, PARSE_FAILED_REASON)
    }

    pub fn invalid_response() -> Self {
        Self::new(Behavior::Other, INVALID_RESPONSE_REASON)
    }

    pub fn service_failure(message: &str, max_chars: usize) -> Self {
        Self::new(Behavior::Error, truncate_chars(message, max_chars))
    }

    /// Degrade a classification failure into the result that gets recorded
    pub fn from_failure(err: &ClassificationError, max_chars: usize) -> Self {
        match err {
            ClassificationError::Malformed(_) => Self::parse_failure(),
            ClassificationError::InvalidLabel(_) => Self::invalid_response(),
            ClassificationError::Service(message) => Self::service_failure(message, max_chars),
            ClassificationError::Frame(e) => Self::service_failure(&e.to_string(), max_chars),
        }
    }

    pub fn clamp_reason(mut self, max_chars: usize) -> Self {
        self.reason = truncate_chars(&self.reason, max_chars);
        self
    }

    pub fn is_sentinel(&self) -> bool {
        self.classification == Behavior::Error
            || (self.classification == Behavior::Other
                && (self.reason == PARSE_FAILED_REASON || self.reason == INVALID_RESPONSE_REASON))
    }
}

#[derive(Deserialize)]
struct ModelAnswer {
    classification: String,
    #[serde(default)]
    reason: String,
}

/// Validate the model's text answer, which may be wrapped in a ```json fence
pub fn parse_model_output(text: &str) -> Result<AnalysisResult, ClassificationError> {
    let body = strip_code_fence(text.trim());
    let answer: ModelAnswer =
        serde_json::from_str(body).map_err(|e| ClassificationError::Malformed(e.to_string()))?;

    let classification = Behavior::from_model_label(answer.classification.trim())
        .ok_or(ClassificationError::InvalidLabel(answer.classification))?;
    Ok(AnalysisResult::new(classification, answer.reason))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
