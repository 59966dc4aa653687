use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one document-analysis task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Uploading,
    Parsing,
    Translating,
    Extracting,
    Analyzing,
    Complete,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Complete | AnalysisStatus::Error)
    }

    pub fn is_active(self) -> bool {
        !matches!(
            self,
            AnalysisStatus::Idle | AnalysisStatus::Complete | AnalysisStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Idle => "idle",
            AnalysisStatus::Uploading => "uploading",
            AnalysisStatus::Parsing => "parsing",
            AnalysisStatus::Translating => "translating",
            AnalysisStatus::Extracting => "extracting",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Complete => "complete",
            AnalysisStatus::Error => "error",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of the current analysis task.
///
/// `result` is only ever set while `status == Complete` and `error_message`
/// only while `status == Error`.
#[derive(Debug, Clone, Default)]
pub struct AnalysisTask {
    pub status: AnalysisStatus,
    pub progress: u8,
    pub status_message: String,
    pub error_message: Option<String>,
    pub remote_task_id: Option<String>,
    pub result: Option<Arc<AnalysisResult>>,
}

impl AnalysisTask {
    pub fn is_analyzing(&self) -> bool {
        self.status.is_active()
    }

    pub fn has_result(&self) -> bool {
        self.status == AnalysisStatus::Complete
            && self
                .result
                .as_ref()
                .is_some_and(|r| !r.original_text.is_empty())
    }
}

/// Payload of the terminal success frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub original_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub translated_text: String,
    #[serde(rename = "charts", default, deserialize_with = "null_as_default")]
    pub images: Vec<ExtractedImage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub paper_analysis: Option<PaperAnalysis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperAnalysis {
    #[serde(default)]
    pub summary: serde_json::Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub paper_text: String,
}

/// One image artifact extracted from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedImage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_url: String,
    #[serde(default, deserialize_with = "lenient_page")]
    pub page_number: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub analysis: ImageAnalysis,
}

/// Category, one-line summary and key points produced for an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_points: Vec<String>,
}

impl ImageAnalysis {
    pub fn is_empty(&self) -> bool {
        self.category.as_deref().is_none_or(str::is_empty)
            && self.summary.as_deref().is_none_or(str::is_empty)
            && self.key_points.is_empty()
    }
}

/// Observable state of the current translation job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslationJob {
    pub active: bool,
    pub progress: u8,
    pub chunks_total: usize,
    pub chunks_done: usize,
    /// Completed chunks joined in source order.
    pub translated: String,
    pub error_message: Option<String>,
}

/// The two credential strings, captured once when a task starts.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub mineru_api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, mineru_api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            mineru_api_key: mineru_api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("mineru_api_key", &redact(&self.mineru_api_key))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}

#[derive(Clone, PartialEq, Eq)]
pub enum DocumentSource {
    File { name: String, bytes: Vec<u8> },
    Url(String),
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::File { name, bytes } => f
                .debug_struct("File")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
            DocumentSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub source: DocumentSource,
    pub translate: bool,
    pub extract_charts: bool,
    pub enable_paper_analysis: bool,
}

impl AnalysisOptions {
    pub fn file(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::with_source(DocumentSource::File {
            name: name.into(),
            bytes,
        })
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::with_source(DocumentSource::Url(url.into()))
    }

    fn with_source(source: DocumentSource) -> Self {
        Self {
            source,
            translate: false,
            extract_charts: true,
            enable_paper_analysis: false,
        }
    }
}

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// Page numbers arrive as ints, floats, strings or null; anything that is
/// not a positive number reads as 0 instead of failing the whole frame.
fn lenient_page<'de, D>(de: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let page = match Option::<serde_json::Value>::deserialize(de)? {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(page
        .filter(|p| p.is_finite() && *p > 0.0)
        .map_or(0, |p| p.round().min(f64::from(u32::MAX)) as u32))
}
