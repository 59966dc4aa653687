#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use paper_ingest::error::{IngestError, Result};
use paper_ingest::notify::{NoticeLevel, Notifier};
use paper_ingest::transport::{
    AnalysisStream, ImageAnalysisRequest, RemoteTaskStatus, TranslateRequest, Transport,
};
use paper_ingest::types::{AnalysisOptions, Credentials, ImageAnalysis};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(usize),
    CancelTask(String),
    Translate(String),
    AnalyzeImage(String),
    Status(String),
}

pub enum OpenReply {
    Stream {
        task_id: Option<String>,
        chunks: Vec<Vec<u8>>,
        /// Keep the body open after the last chunk until aborted.
        hang: bool,
    },
    Fail(IngestError),
}

pub enum TranslateReply {
    Ok(String),
    Fail(String),
    /// Wait for the abort signal.
    Hang,
}

pub enum ImageReply {
    Ok(ImageAnalysis),
    Fail(String),
}

#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    opens: Mutex<VecDeque<OpenReply>>,
    open_signals: Mutex<Vec<CancellationToken>>,
    /// For every open after the first: were all earlier signals already fired?
    earlier_aborted_at_open: Mutex<Vec<bool>>,
    translations: Mutex<VecDeque<TranslateReply>>,
    images: Mutex<HashMap<String, VecDeque<ImageReply>>>,
    /// Suspension points inside each image request.
    pub image_yields: usize,
    /// Remote cancel calls never answer.
    silent_cancel: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_yields(yields: usize) -> Self {
        Self {
            image_yields: yields,
            ..Self::default()
        }
    }

    pub fn push_open(&self, reply: OpenReply) {
        self.opens.lock().unwrap().push_back(reply);
    }

    pub fn push_stream(&self, task_id: Option<&str>, chunks: Vec<Vec<u8>>, hang: bool) {
        self.push_open(OpenReply::Stream {
            task_id: task_id.map(str::to_owned),
            chunks,
            hang,
        });
    }

    pub fn push_translation(&self, reply: TranslateReply) {
        self.translations.lock().unwrap().push_back(reply);
    }

    pub fn push_image(&self, id: &str, reply: ImageReply) {
        self.images
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn silence_cancel_endpoint(&self) {
        self.silent_cancel.store(true, Ordering::SeqCst);
    }

    /// Abort signal handed to the `n`-th open (0-based).
    pub fn open_signal(&self, n: usize) -> CancellationToken {
        self.open_signals.lock().unwrap()[n].clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn earlier_aborted_at_open(&self) -> Vec<bool> {
        self.earlier_aborted_at_open.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_analysis(
        &self,
        _options: &AnalysisOptions,
        _credentials: &Credentials,
        signal: &CancellationToken,
    ) -> Result<AnalysisStream> {
        let n = {
            let mut signals = self.open_signals.lock().unwrap();
            if !signals.is_empty() {
                let all = signals.iter().all(|s| s.is_cancelled());
                self.earlier_aborted_at_open.lock().unwrap().push(all);
            }
            signals.push(signal.clone());
            signals.len()
        };
        self.record(Call::Open(n));

        let reply = self
            .opens
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenReply::Fail(IngestError::Transport("no scripted reply".into())));

        match reply {
            OpenReply::Fail(err) => Err(err),
            OpenReply::Stream {
                task_id,
                chunks,
                hang,
            } => {
                let body = stream::iter(chunks.into_iter().map(Ok));
                let body = if hang {
                    body.chain(stream::pending()).boxed()
                } else {
                    body.boxed()
                };
                Ok(AnalysisStream {
                    task_id,
                    body: body.take_until(signal.clone().cancelled_owned()).boxed(),
                })
            }
        }
    }

    async fn cancel_task(&self, task_id: &str, _credentials: &Credentials) -> Result<()> {
        self.record(Call::CancelTask(task_id.to_string()));
        if self.silent_cancel.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn translate(
        &self,
        req: &TranslateRequest,
        _api_key: &str,
        signal: &CancellationToken,
    ) -> Result<String> {
        self.record(Call::Translate(req.text.clone()));
        let reply = self.translations.lock().unwrap().pop_front();
        match reply {
            Some(TranslateReply::Ok(text)) => Ok(text),
            Some(TranslateReply::Fail(msg)) => Err(IngestError::Http {
                status: 500,
                message: msg,
            }),
            Some(TranslateReply::Hang) => {
                signal.cancelled().await;
                Err(IngestError::Cancelled)
            }
            None => Ok(req.text.to_uppercase()),
        }
    }

    async fn analyze_image(
        &self,
        image_id: &str,
        _req: &ImageAnalysisRequest,
        _signal: &CancellationToken,
    ) -> Result<ImageAnalysis> {
        self.record(Call::AnalyzeImage(image_id.to_string()));
        for _ in 0..self.image_yields {
            tokio::task::yield_now().await;
        }
        let reply = self
            .images
            .lock()
            .unwrap()
            .get_mut(image_id)
            .and_then(|q| q.pop_front());
        match reply {
            Some(ImageReply::Ok(analysis)) => Ok(analysis),
            Some(ImageReply::Fail(msg)) => Err(IngestError::Http {
                status: 500,
                message: msg,
            }),
            None => Ok(analysis_for(image_id)),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus> {
        self.record(Call::Status(task_id.to_string()));
        Ok(RemoteTaskStatus {
            task_id: task_id.to_string(),
            status: "running".into(),
            progress: 50.0,
            message: None,
            error: None,
        })
    }
}

pub fn analysis_for(id: &str) -> ImageAnalysis {
    ImageAnalysis {
        category: Some("bar".into()),
        summary: Some(format!("summary of {id}")),
        key_points: vec!["point".into()],
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().unwrap().push((level, message.to_string()));
    }
}

pub fn creds() -> Credentials {
    Credentials::new("sk-test", "mineru-test")
}

pub fn frame(json: &str) -> Vec<u8> {
    format!("data: {json}\n\n").into_bytes()
}

/// Concatenates frames and re-splits the bytes at a fixed stride.
pub fn split_every(chunks: &[Vec<u8>], stride: usize) -> Vec<Vec<u8>> {
    let all: Vec<u8> = chunks.concat();
    all.chunks(stride.max(1)).map(<[u8]>::to_vec).collect()
}
