use crate::types::ImageAnalysis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub max_chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateResponse {
    pub translated_text: String,
}

/// Per-image analysis headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageAnalysisRequest {
    pub api_key: String,
    pub vision_model: Option<String>,
    pub chart_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageAnalysisResponse {
    #[serde(default)]
    pub analysis: Option<ImageAnalysis>,
}

/// Server-side view of a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTaskStatus {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
