use crate::chunk_plan::{ChunkPlan, PARAGRAPH_SEPARATOR};
use crate::config::Translation;
use crate::error::{IngestError, Result};
use crate::notify::{NoticeLevel, Notifier};
use crate::transport::{Transport, TranslateRequest};
use crate::types::TranslationJob;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sequential chunked translation with a visible, in-order partial result.
pub struct TranslationPipeline<T: Transport> {
    transport: Arc<T>,
    notifier: Arc<dyn Notifier>,
    cfg: Translation,
    state: watch::Sender<TranslationJob>,
    active: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl<T: Transport> TranslationPipeline<T> {
    pub fn new(transport: Arc<T>, notifier: Arc<dyn Notifier>, cfg: Translation) -> Self {
        let (state, _) = watch::channel(TranslationJob::default());
        Self {
            transport,
            notifier,
            cfg,
            state,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> TranslationJob {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranslationJob> {
        self.state.subscribe()
    }

    pub fn is_translating(&self) -> bool {
        self.state.borrow().active
    }

    /// Translates `text` chunk by chunk, one request at a time.
    ///
    /// Returns the full translation, or `Ok(None)` if the job was cancelled
    /// or replaced. On failure the chunks finished so far stay visible in
    /// [`snapshot`](Self::snapshot).
    pub async fn start(&self, text: &str, api_key: &str) -> Result<Option<String>> {
        if api_key.trim().is_empty() {
            let err = IngestError::validation("Configure the API key in settings first");
            self.notifier.notify(NoticeLevel::Error, &err.to_string());
            return Err(err);
        }
        if text.trim().is_empty() {
            return Err(IngestError::validation("Nothing to translate"));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let signal = CancellationToken::new();
        self.replace_active(Some((generation, signal.clone())));

        let plan = ChunkPlan::from_text(text, self.cfg.max_chunk_size);
        let total = plan.len();
        self.state.send_replace(TranslationJob {
            active: true,
            chunks_total: total,
            ..Default::default()
        });
        info!(generation, chunks = total, "translation started");

        let mut done: Vec<String> = Vec::with_capacity(total);
        for (i, chunk) in plan.chunks.iter().enumerate() {
            if signal.is_cancelled() || !self.is_current(generation) {
                return Ok(None);
            }
            if plan.is_oversized(i) {
                debug!(chunk = i + 1, "chunk exceeds max_chunk_size (single paragraph)");
            }

            let translated = if chunk.trim().is_empty() {
                chunk.clone()
            } else {
                let req = TranslateRequest {
                    text: chunk.clone(),
                    source_lang: self.cfg.source_lang.clone(),
                    target_lang: self.cfg.target_lang.clone(),
                    max_chunk_size: plan.max_chunk_size,
                };
                debug!(chunk = i + 1, total, chars = chunk.len(), "translating chunk");
                let res = tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(IngestError::Cancelled),
                    res = self.transport.translate(&req, api_key, &signal) => res,
                };
                match res {
                    Ok(t) => t,
                    Err(err) => return self.fail(generation, i, total, err),
                }
            };

            done.push(translated);
            let progress = percent(i + 1, total);
            let joined = done.join(PARAGRAPH_SEPARATOR);
            let current = self.state.send_if_modified(|job| {
                if !self.is_current(generation) {
                    return false;
                }
                job.chunks_done = i + 1;
                job.progress = progress;
                job.translated = joined;
                true
            });
            if !current {
                return Ok(None);
            }
        }

        self.clear_active(generation);
        let mut full = String::new();
        self.state.send_if_modified(|job| {
            if !self.is_current(generation) {
                return false;
            }
            job.active = false;
            full = job.translated.clone();
            true
        });
        info!(generation, chars = full.len(), "translation complete");
        self.notifier.notify(NoticeLevel::Success, "Translation complete");
        Ok(Some(full))
    }

    /// Stops the job before its next chunk; finished chunks are kept.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.replace_active(None).is_some() {
            debug!("translation cancelled");
        }
        self.state.send_if_modified(|job| {
            if !job.active {
                return false;
            }
            job.active = false;
            true
        });
    }

    fn fail(
        &self,
        generation: u64,
        index: usize,
        total: usize,
        err: IngestError,
    ) -> Result<Option<String>> {
        if err.is_cancelled() || !self.is_current(generation) {
            return Ok(None);
        }
        self.clear_active(generation);

        let message = format!("chunk {}/{} failed: {err}", index + 1, total);
        self.state.send_modify(|job| {
            job.active = false;
            job.error_message = Some(message.clone());
        });
        warn!(generation, "translation {message}");
        self.notifier
            .notify(NoticeLevel::Error, &format!("Translation failed: {message}"));
        Err(err)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn replace_active(
        &self,
        next: Option<(u64, CancellationToken)>,
    ) -> Option<(u64, CancellationToken)> {
        let previous = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, next)
        };
        if let Some((_, signal)) = previous.as_ref() {
            signal.cancel();
        }
        previous
    }

    fn clear_active(&self, generation: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(g, _)| *g == generation) {
            *active = None;
        }
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}
