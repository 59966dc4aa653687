//! Lifecycle of one streamed document-analysis task.
//!
//! Each `start()` takes a fresh generation number. Cancelling, resetting or
//! starting again bumps the generation first and aborts the previous request
//! synchronously, so any frame or completion that arrives for an older
//! generation is discarded instead of mutating the current task.

use crate::config::Upload;
use crate::error::{IngestError, Result};
use crate::frame::{ProgressFrame, decode_frames};
use crate::notify::{NoticeLevel, Notifier};
use crate::transport::Transport;
use crate::types::{
    AnalysisOptions, AnalysisResult, AnalysisStatus, AnalysisTask, Credentials, DocumentSource,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub const CANCELLED_MESSAGE: &str = "Analysis cancelled";

/// How long cleanup waits on the server's cancel endpoint before moving on.
pub const REMOTE_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// The network resources owned by the running attempt.
struct ActiveRequest {
    generation: u64,
    signal: CancellationToken,
    credentials: Credentials,
    task_id: Option<String>,
}

enum Outcome {
    Complete(Arc<AnalysisResult>),
    Failed(String),
}

pub struct AnalysisController<T: Transport> {
    transport: Arc<T>,
    notifier: Arc<dyn Notifier>,
    upload: Upload,
    state: watch::Sender<AnalysisTask>,
    active: Mutex<Option<ActiveRequest>>,
    generation: AtomicU64,
}

impl<T: Transport> AnalysisController<T> {
    pub fn new(transport: Arc<T>, notifier: Arc<dyn Notifier>, upload: Upload) -> Self {
        let (state, _) = watch::channel(AnalysisTask::default());
        Self {
            transport,
            notifier,
            upload,
            state,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> AnalysisTask {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisTask> {
        self.state.subscribe()
    }

    pub fn is_analyzing(&self) -> bool {
        self.state.borrow().is_analyzing()
    }

    pub fn has_result(&self) -> bool {
        self.state.borrow().has_result()
    }

    /// Runs one analysis attempt to completion.
    ///
    /// Returns `Ok(None)` when the attempt was cancelled or superseded by a
    /// later `start()`/`cancel()`/`reset()`.
    pub async fn start(
        &self,
        options: AnalysisOptions,
        credentials: Credentials,
    ) -> Result<Option<Arc<AnalysisResult>>> {
        if let Err(err) = validate(&self.upload, &options, &credentials) {
            self.notifier.notify(NoticeLevel::Error, &err.to_string());
            return Err(err);
        }
        let options = normalize(options);

        let generation = self.invalidate();
        let signal = CancellationToken::new();
        let previous = self.replace_active(Some(ActiveRequest {
            generation,
            signal: signal.clone(),
            credentials: credentials.clone(),
            task_id: None,
        }));
        self.release(previous).await;

        if !self.is_current(generation) {
            return Ok(None);
        }

        let preparing = match &options.source {
            DocumentSource::File { .. } => "Preparing upload...",
            DocumentSource::Url(_) => "Preparing to parse from URL...",
        };
        self.state.send_replace(AnalysisTask {
            status: AnalysisStatus::Uploading,
            status_message: preparing.to_string(),
            ..Default::default()
        });
        info!(generation, source = ?options.source, "analysis started");

        let outcome = self.run(&options, &credentials, &signal, generation).await;
        self.finish(generation, outcome).await
    }

    /// Aborts the running attempt and returns to `idle`.
    ///
    /// Terminal states and `idle` are left untouched, so repeated calls are
    /// harmless.
    pub async fn cancel(&self) {
        let generation = self.invalidate();
        let previous = self.take_active();
        self.release(previous).await;

        if !self.is_current(generation) {
            return;
        }
        let changed = self.state.send_if_modified(|task| {
            if !task.status.is_active() {
                return false;
            }
            task.status = AnalysisStatus::Idle;
            task.status_message = CANCELLED_MESSAGE.to_string();
            task.error_message = None;
            true
        });
        if changed {
            info!("analysis cancelled");
            self.notifier.notify(NoticeLevel::Info, CANCELLED_MESSAGE);
        }
    }

    /// Aborts the running attempt and zeroes every field.
    pub async fn reset(&self) {
        let generation = self.invalidate();
        let previous = self.take_active();
        self.release(previous).await;

        if self.is_current(generation) {
            self.state.send_replace(AnalysisTask::default());
        }
    }

    async fn run(
        &self,
        options: &AnalysisOptions,
        credentials: &Credentials,
        signal: &CancellationToken,
        generation: u64,
    ) -> Result<Outcome> {
        let opened = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(IngestError::Cancelled),
            opened = self.transport.open_analysis(options, credentials, signal) => opened?,
        };

        if let Some(task_id) = opened.task_id {
            self.record_task_id(generation, task_id);
        }

        let frames = decode_frames(opened.body);
        tokio::pin!(frames);

        loop {
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(IngestError::Cancelled),
                next = frames.next() => next,
            };
            match next {
                Some(Ok(frame)) => {
                    if let Some(outcome) = self.apply(generation, frame)? {
                        return Ok(outcome);
                    }
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        if signal.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        Err(IngestError::Transport(
            "analysis stream ended before a terminal frame".into(),
        ))
    }

    /// Folds one frame into the task state. Frames for a stale generation or
    /// a task already in a terminal state are rejected.
    fn apply(&self, generation: u64, frame: ProgressFrame) -> Result<Option<Outcome>> {
        let mut outcome = None;
        let mut stale = false;

        self.state.send_if_modified(|task| {
            if !self.is_current(generation) || !task.status.is_active() {
                stale = true;
                return false;
            }

            task.progress = task.progress.max(frame.percent());
            if let Some(message) = frame.message.as_deref() {
                task.status_message = message.to_string();
            }

            match frame.status {
                AnalysisStatus::Complete => {
                    let result = Arc::new(frame.data.unwrap_or_default());
                    task.status = AnalysisStatus::Complete;
                    task.progress = 100;
                    task.result = Some(result.clone());
                    outcome = Some(Outcome::Complete(result));
                }
                AnalysisStatus::Error => {
                    let message = match frame.message.as_deref().map(str::trim) {
                        Some(m) if !m.is_empty() => m.to_string(),
                        _ => "analysis failed".to_string(),
                    };
                    task.status = AnalysisStatus::Error;
                    task.error_message = Some(message.clone());
                    outcome = Some(Outcome::Failed(message));
                }
                AnalysisStatus::Idle => {}
                status => task.status = status,
            }
            true
        });

        if stale {
            debug!(generation, "dropping frame for superseded attempt");
            return Err(IngestError::Cancelled);
        }
        Ok(outcome)
    }

    async fn finish(
        &self,
        generation: u64,
        outcome: Result<Outcome>,
    ) -> Result<Option<Arc<AnalysisResult>>> {
        match outcome {
            Ok(Outcome::Complete(result)) => {
                // The server task is done; nothing left to cancel remotely.
                drop(self.take_active_if(generation));
                info!(
                    generation,
                    chars = result.original_text.len(),
                    images = result.images.len(),
                    "analysis complete"
                );
                if result.original_text.is_empty() {
                    self.notifier.notify(
                        NoticeLevel::Warning,
                        "Analysis complete, but no text was extracted",
                    );
                } else {
                    self.notifier.notify(
                        NoticeLevel::Success,
                        &format!(
                            "Analysis complete: extracted {} characters and {} images",
                            result.original_text.chars().count(),
                            result.images.len()
                        ),
                    );
                }
                Ok(Some(result))
            }
            Ok(Outcome::Failed(message)) => {
                drop(self.take_active_if(generation));
                warn!(generation, "analysis failed on server: {message}");
                self.notifier
                    .notify(NoticeLevel::Error, &format!("Analysis failed: {message}"));
                Err(IngestError::Remote(message))
            }
            Err(err) if err.is_cancelled() => {
                debug!(generation, "analysis attempt cancelled");
                Ok(None)
            }
            Err(err) => {
                if !self.is_current(generation) {
                    debug!(generation, "ignoring error from superseded attempt: {err}");
                    return Ok(None);
                }
                let message = err.to_string();
                self.state.send_modify(|task| {
                    task.status = AnalysisStatus::Error;
                    task.error_message = Some(message.clone());
                    task.result = None;
                });
                warn!(generation, "analysis failed: {message}");
                self.notifier
                    .notify(NoticeLevel::Error, &format!("Analysis failed: {message}"));

                // The server may still be working on it.
                let active = self.take_active_if(generation);
                self.release(active).await;
                Err(err)
            }
        }
    }

    /// Aborts the request locally, then asks the server to drop its task.
    async fn release(&self, request: Option<ActiveRequest>) {
        let Some(request) = request else {
            return;
        };
        request.signal.cancel();

        let Some(task_id) = request.task_id else {
            return;
        };
        let cancel = self.transport.cancel_task(&task_id, &request.credentials);
        match tokio::time::timeout(REMOTE_CANCEL_GRACE, cancel).await {
            Ok(Ok(())) => debug!(task_id = %task_id, "remote task cancelled"),
            Ok(Err(err)) => warn!(task_id = %task_id, "remote cancel failed (ignored): {err}"),
            Err(_) => warn!(task_id = %task_id, "remote cancel timed out (ignored)"),
        }
    }

    fn record_task_id(&self, generation: u64, task_id: String) {
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            match active.as_mut() {
                Some(req) if req.generation == generation => req.task_id = Some(task_id.clone()),
                _ => return,
            }
        }
        debug!(generation, task_id = %task_id, "remote task id");
        self.state.send_if_modified(|task| {
            if !self.is_current(generation) {
                return false;
            }
            task.remote_task_id = Some(task_id);
            true
        });
    }

    fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Swaps in the new request; the old one is aborted before returning.
    fn replace_active(&self, next: Option<ActiveRequest>) -> Option<ActiveRequest> {
        let previous = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, next)
        };
        if let Some(req) = previous.as_ref() {
            req.signal.cancel();
        }
        previous
    }

    /// Only one caller ever receives a given request, so its cleanup runs once.
    fn take_active(&self) -> Option<ActiveRequest> {
        self.replace_active(None)
    }

    fn take_active_if(&self, generation: u64) -> Option<ActiveRequest> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|req| req.generation == generation) {
            active.take()
        } else {
            None
        }
    }
}

impl<T: Transport> Drop for AnalysisController<T> {
    fn drop(&mut self) {
        let Some(request) = self.take_active() else {
            return;
        };
        let Some(task_id) = request.task_id else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = self.transport.clone();
            handle.spawn(async move {
                let cancel = transport.cancel_task(&task_id, &request.credentials);
                match tokio::time::timeout(REMOTE_CANCEL_GRACE, cancel).await {
                    Ok(Ok(())) => debug!(task_id = %task_id, "remote task cancelled on teardown"),
                    Ok(Err(err)) => warn!(task_id = %task_id, "teardown cancel failed: {err}"),
                    Err(_) => warn!(task_id = %task_id, "remote cancel on teardown timed out"),
                }
            });
        }
    }
}

/// Rejects a request before anything touches the network.
pub fn validate(
    upload: &Upload,
    options: &AnalysisOptions,
    credentials: &Credentials,
) -> Result<()> {
    match &options.source {
        DocumentSource::File { name, bytes } => {
            if bytes.is_empty() {
                return Err(IngestError::validation("Select a file or enter a URL first"));
            }
            if upload.max_file_bytes > 0 && bytes.len() as u64 > upload.max_file_bytes {
                return Err(IngestError::validation(format!(
                    "File exceeds the upload limit of {} MB",
                    upload.max_file_bytes / (1024 * 1024)
                )));
            }
            if upload.require_pdf_extension && !name.to_ascii_lowercase().ends_with(".pdf") {
                return Err(IngestError::validation(format!(
                    "Only PDF files are supported: {name}"
                )));
            }
        }
        DocumentSource::Url(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(IngestError::validation("Select a file or enter a URL first"));
            }
            let well_formed = Url::parse(raw)
                .ok()
                .is_some_and(|u| matches!(u.scheme(), "http" | "https") && u.has_host());
            if !well_formed {
                return Err(IngestError::validation(
                    "URL must start with http:// or https://",
                ));
            }
        }
    }

    if credentials.api_key.trim().is_empty() {
        return Err(IngestError::validation(
            "Configure the API key in settings first",
        ));
    }
    if credentials.mineru_api_key.trim().is_empty() {
        return Err(IngestError::validation(
            "Configure the MinerU API key in settings first",
        ));
    }
    Ok(())
}

fn normalize(mut options: AnalysisOptions) -> AnalysisOptions {
    if let DocumentSource::Url(raw) = &mut options.source {
        *raw = raw.trim().to_string();
    }
    options
}
