use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Outcome of a single scan analysis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
pub enum Diagnosis {
    #[serde(rename = "condition detected")]
    #[strum(serialize = "condition detected")]
    ConditionDetected,
    #[serde(rename = "normal")]
    #[strum(serialize = "normal")]
    Normal,
}

impl Diagnosis {
    pub fn title(&self) -> &'static str {
        match self {
            Diagnosis::ConditionDetected => "Condition Detected",
            Diagnosis::Normal => "Normal Scan Detected",
        }
    }

    /// CSS class used by the result panel.
    pub fn css_class(&self) -> &'static str {
        match self {
            Diagnosis::ConditionDetected => "detected",
            Diagnosis::Normal => "normal",
        }
    }

    pub fn advisory(&self) -> &'static [&'static str] {
        match self {
            Diagnosis::ConditionDetected => &[
                "Schedule a visit with your gynecologist",
                "Maintain a balanced diet rich in fiber",
                "Engage in regular physical activity",
                "Monitor your symptoms regularly",
            ],
            Diagnosis::Normal => &[
                "Maintain a healthy lifestyle",
                "Schedule annual check-ups",
                "Monitor for any changes in symptoms",
            ],
        }
    }
}

/// Renders a confidence in [0, 1] as a percentage with one decimal place.
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.1}%", confidence * 100.0)
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InferenceRequest {
    /// Base64 image bytes, optionally wrapped in a `data:` URL.
    pub image_data: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisResponse {
    pub request_id: String,
    pub label: Diagnosis,
    pub title: String,
    pub confidence: f32,
    pub confidence_display: String,
    pub advisory: Vec<String>,
    pub image_sha256: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    Upload,
    Decode,
    Inference,
    Internal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}
