use crate::analysis::AnalysisController;
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::images::{ImagePool, WalkSummary, order_by_reference};
use crate::notify::Notifier;
use crate::transport::Transport;
use crate::translate::TranslationPipeline;
use crate::types::{AnalysisOptions, AnalysisResult, Credentials, ExtractedImage};
use std::sync::Arc;
use tracing::info;

/// Ties the analysis task, the translation job and the image pool together
/// the way one analyzer screen drives them.
pub struct AnalyzerSession<T: Transport> {
    pub analysis: AnalysisController<T>,
    pub translation: TranslationPipeline<T>,
    pub images: ImagePool<T>,
    auto_analyze_images: bool,
}

impl<T: Transport> AnalyzerSession<T> {
    pub fn new(cfg: &Config, transport: Arc<T>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            analysis: AnalysisController::new(
                transport.clone(),
                notifier.clone(),
                cfg.upload.clone(),
            ),
            translation: TranslationPipeline::new(
                transport.clone(),
                notifier.clone(),
                cfg.translation.clone(),
            ),
            images: ImagePool::new(transport, notifier, cfg.images.clone()),
            auto_analyze_images: cfg.images.auto_analyze,
        }
    }

    /// Drops translation and image work from the previous document, then
    /// runs a new analysis.
    pub async fn start_analysis(
        &self,
        options: AnalysisOptions,
        credentials: Credentials,
    ) -> Result<Option<Arc<AnalysisResult>>> {
        self.translation.cancel();
        self.images.reset();
        self.analysis.start(options, credentials).await
    }

    pub async fn cancel(&self) {
        self.analysis.cancel().await;
        self.translation.cancel();
    }

    pub async fn reset(&self) {
        self.images.reset();
        self.analysis.reset().await;
        self.translation.cancel();
    }

    /// Translates the extracted text of the current result.
    pub async fn translate_result(&self, credentials: &Credentials) -> Result<Option<String>> {
        let result = self
            .analysis
            .snapshot()
            .result
            .ok_or_else(|| IngestError::validation("No analysis result to translate"))?;
        self.translation
            .start(&result.original_text, &credentials.api_key)
            .await
    }

    /// Images of the current result in reading order.
    pub fn ordered_images(&self) -> Vec<ExtractedImage> {
        match self.analysis.snapshot().result {
            Some(result) => order_by_reference(&result.images, &result.original_text),
            None => Vec::new(),
        }
    }

    /// Runs the sequential image walk over a complete result.
    pub async fn analyze_images(&self, credentials: &Credentials) -> Option<WalkSummary> {
        if !self.auto_analyze_images || !self.analysis.has_result() {
            return None;
        }
        let images = self.ordered_images();
        if images.is_empty() {
            return None;
        }
        info!(images = images.len(), "analyzing extracted images");
        Some(self.images.analyze_all(&images, &credentials.api_key).await)
    }

    /// The client-side translation if one exists, else the server's.
    pub fn display_translation(&self) -> String {
        let job = self.translation.snapshot();
        if !job.translated.is_empty() {
            return job.translated;
        }
        self.analysis
            .snapshot()
            .result
            .map(|r| r.translated_text.clone())
            .unwrap_or_default()
    }
}
