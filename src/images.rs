//! On-demand, deduplicated analysis of extracted images.
//!
//! At most one request per image id is ever outstanding, and a stored
//! analysis is never requested again until the pool is reset.

use crate::config::Images;
use crate::error::{IngestError, Result};
use crate::notify::{NoticeLevel, Notifier};
use crate::transport::{ImageAnalysisRequest, Transport};
use crate::types::{ExtractedImage, ImageAnalysis};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Analyzed(ImageAnalysis),
    /// Already analyzed, or a request for this id is in flight.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub aborted: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    generation: u64,
    entries: HashMap<String, ImageAnalysis>,
    in_flight: HashSet<String>,
}

pub struct ImagePool<T: Transport> {
    transport: Arc<T>,
    notifier: Arc<dyn Notifier>,
    cfg: Images,
    state: Mutex<PoolState>,
    /// Fires on reset; aborts every request of the old generation.
    signal: Mutex<CancellationToken>,
    walk: Mutex<Option<(u64, CancellationToken)>>,
    walk_generation: AtomicU64,
}

impl<T: Transport> ImagePool<T> {
    pub fn new(transport: Arc<T>, notifier: Arc<dyn Notifier>, cfg: Images) -> Self {
        Self {
            transport,
            notifier,
            cfg,
            state: Mutex::new(PoolState::default()),
            signal: Mutex::new(CancellationToken::new()),
            walk: Mutex::new(None),
            walk_generation: AtomicU64::new(0),
        }
    }

    pub fn entry(&self, id: &str) -> Option<ImageAnalysis> {
        self.lock_state().entries.get(id).cloned()
    }

    pub fn entries(&self) -> HashMap<String, ImageAnalysis> {
        self.lock_state().entries.clone()
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.lock_state().in_flight.contains(id)
    }

    /// Analyzes one image unless it already has an entry or is in flight.
    ///
    /// A failure leaves no entry behind, so the image can be retried.
    pub async fn analyze(&self, image: &ExtractedImage, api_key: &str) -> Result<ImageOutcome> {
        if api_key.trim().is_empty() {
            return Err(IngestError::validation(
                "Configure the API key in settings first",
            ));
        }

        let guard = {
            let mut st = self.lock_state();
            if st.entries.contains_key(&image.id) || st.in_flight.contains(&image.id) {
                debug!(image = %image.id, "image already analyzed or in flight");
                return Ok(ImageOutcome::Skipped);
            }
            st.in_flight.insert(image.id.clone());
            InFlightGuard {
                state: &self.state,
                id: image.id.clone(),
                generation: st.generation,
                finished: false,
            }
        };

        let signal = self
            .signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let req = ImageAnalysisRequest {
            api_key: api_key.to_string(),
            vision_model: non_empty(&self.cfg.vision_model),
            chart_prompt: non_empty(&self.cfg.chart_prompt),
        };

        debug!(image = %image.id, page = image.page_number, "analyzing image");
        let res = tokio::select! {
            biased;
            _ = signal.cancelled() => Err(IngestError::Cancelled),
            res = self.transport.analyze_image(&image.id, &req, &signal) => res,
        };

        match res {
            Ok(analysis) => {
                guard.finish(Some(analysis.clone()));
                Ok(ImageOutcome::Analyzed(analysis))
            }
            Err(err) => {
                guard.finish(None);
                if !err.is_cancelled() {
                    warn!(image = %image.id, "image analysis failed: {err}");
                    self.notifier.notify(
                        NoticeLevel::Error,
                        &format!("Image analysis failed: {}", image.id),
                    );
                }
                Err(err)
            }
        }
    }

    /// Walks `images` in order, analyzing one at a time.
    ///
    /// Starting a walk aborts the previous one. An abort stops the walk
    /// before its next request; the request already in flight finishes.
    pub async fn analyze_all(&self, images: &[ExtractedImage], api_key: &str) -> WalkSummary {
        let walk_id = self.walk_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let walk = CancellationToken::new();
        {
            let mut slot = self.walk.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, previous)) = slot.replace((walk_id, walk.clone())) {
                previous.cancel();
            }
        }

        let mut summary = WalkSummary::default();
        if self.cfg.walk_start_delay_ms > 0 {
            let delay = Duration::from_millis(self.cfg.walk_start_delay_ms);
            tokio::select! {
                _ = walk.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        for image in images {
            if walk.is_cancelled() {
                break;
            }
            if self.entry(&image.id).is_some() {
                summary.skipped += 1;
                continue;
            }
            match self.analyze(image, api_key).await {
                Ok(ImageOutcome::Analyzed(_)) => summary.analyzed += 1,
                Ok(ImageOutcome::Skipped) => summary.skipped += 1,
                Err(err) if err.is_cancelled() => break,
                Err(_) => summary.failed += 1,
            }
            tokio::task::yield_now().await;
        }

        summary.aborted = walk.is_cancelled();
        {
            let mut slot = self.walk.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|(id, _)| *id == walk_id) {
                *slot = None;
            }
        }
        info!(
            analyzed = summary.analyzed,
            skipped = summary.skipped,
            failed = summary.failed,
            aborted = summary.aborted,
            "image walk finished"
        );
        summary
    }

    pub fn abort_walk(&self) {
        let previous = self
            .walk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, walk)) = previous {
            walk.cancel();
        }
    }

    /// Forgets every entry and aborts all outstanding work.
    pub fn reset(&self) {
        self.abort_walk();
        {
            let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
            signal.cancel();
            *signal = CancellationToken::new();
        }
        let mut st = self.lock_state();
        st.generation += 1;
        st.entries.clear();
        st.in_flight.clear();
    }

    /// Copies of `images` with any stored analysis attached.
    pub fn annotated(&self, images: &[ExtractedImage]) -> Vec<ExtractedImage> {
        let st = self.lock_state();
        images
            .iter()
            .map(|image| {
                let mut image = image.clone();
                if let Some(analysis) = st.entries.get(&image.id) {
                    image.analysis = analysis.clone();
                }
                image
            })
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears an id from the in-flight set exactly once, even if the request
/// future is dropped before it completes.
struct InFlightGuard<'a> {
    state: &'a Mutex<PoolState>,
    id: String,
    generation: u64,
    finished: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self, analysis: Option<ImageAnalysis>) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.generation == self.generation {
            st.in_flight.remove(&self.id);
            if let Some(analysis) = analysis {
                st.entries.insert(self.id.clone(), analysis);
            }
        }
        drop(st);
        self.finished = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.generation == self.generation {
            st.in_flight.remove(&self.id);
        }
    }
}

/// Sorts images by where the markdown first references their file;
/// unreferenced images keep their relative order at the end.
pub fn order_by_reference(images: &[ExtractedImage], markdown: &str) -> Vec<ExtractedImage> {
    let mut keyed: Vec<(Option<usize>, &ExtractedImage)> = images
        .iter()
        .map(|image| (reference_position(image, markdown), image))
        .collect();
    keyed.sort_by_key(|(pos, _)| (pos.is_none(), pos.unwrap_or(0)));
    keyed.into_iter().map(|(_, image)| image.clone()).collect()
}

fn reference_position(image: &ExtractedImage, markdown: &str) -> Option<usize> {
    let name = image.filename.as_deref().filter(|n| !n.is_empty())?;
    if markdown.is_empty() {
        return None;
    }
    markdown
        .find(&format!("images/{name}"))
        .or_else(|| markdown.find(name))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
