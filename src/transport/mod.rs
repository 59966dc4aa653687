pub mod http;
pub mod types;

use crate::error::Result;
use crate::types::{AnalysisOptions, Credentials, ImageAnalysis};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

pub use http::HttpTransport;
pub use types::{ImageAnalysisRequest, RemoteTaskStatus, TranslateRequest, TranslateResponse};

pub const HEADER_API_KEY: &str = "X-API-Key";
pub const HEADER_MINERU_API_KEY: &str = "X-MinerU-API-Key";
pub const HEADER_TASK_ID: &str = "X-Task-Id";
pub const HEADER_VISION_MODEL: &str = "X-Vision-Model";
pub const HEADER_CHART_PROMPT: &str = "X-Chart-Prompt";

pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// An opened analysis response: the server's task handle plus the raw body.
pub struct AnalysisStream {
    pub task_id: Option<String>,
    pub body: ByteStream,
}

/// Network seam for the three controllers.
///
/// Every call that takes a `signal` must return [`IngestError::Cancelled`]
/// promptly once the token fires, and a returned body stream must end.
///
/// [`IngestError::Cancelled`]: crate::error::IngestError::Cancelled
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open_analysis(
        &self,
        options: &AnalysisOptions,
        credentials: &Credentials,
        signal: &CancellationToken,
    ) -> Result<AnalysisStream>;

    /// Best-effort out-of-band cancellation of a server task.
    async fn cancel_task(&self, task_id: &str, credentials: &Credentials) -> Result<()>;

    async fn translate(
        &self,
        req: &TranslateRequest,
        api_key: &str,
        signal: &CancellationToken,
    ) -> Result<String>;

    async fn analyze_image(
        &self,
        image_id: &str,
        req: &ImageAnalysisRequest,
        signal: &CancellationToken,
    ) -> Result<ImageAnalysis>;

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus>;
}
