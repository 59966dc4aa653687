use crate::images::WalkSummary;
use crate::types::{AnalysisStatus, AnalysisTask, TranslationJob};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub source: String,
    pub remote_task_id: Option<String>,
    pub status: AnalysisStatus,
    pub progress: u8,
    pub status_message: String,
    pub error_message: Option<String>,
    pub text_chars: usize,
    pub translated_chars: usize,
    pub image_count: usize,
    pub image_walk: Option<WalkSummary>,
    pub translation: Option<TranslationReport>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl JobReport {
    pub fn from_task(job_id: &str, source: &str, task: &AnalysisTask) -> Self {
        let result = task.result.as_deref();
        Self {
            job_id: job_id.to_string(),
            source: source.to_string(),
            remote_task_id: task.remote_task_id.clone(),
            status: task.status,
            progress: task.progress,
            status_message: task.status_message.clone(),
            error_message: task.error_message.clone(),
            text_chars: result.map_or(0, |r| r.original_text.chars().count()),
            translated_chars: result.map_or(0, |r| r.translated_text.chars().count()),
            image_count: result.map_or(0, |r| r.images.len()),
            image_walk: None,
            translation: None,
            metadata: result.map(|r| r.metadata.clone()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationReport {
    pub chunks_total: usize,
    pub chunks_done: usize,
    pub progress: u8,
    pub error: Option<String>,
}

impl From<&TranslationJob> for TranslationReport {
    fn from(job: &TranslationJob) -> Self {
        Self {
            chunks_total: job.chunks_total,
            chunks_done: job.chunks_done,
            progress: job.progress,
            error: job.error_message.clone(),
        }
    }
}
