//! Incremental decoder for the `data: {json}` progress frames of the
//! analysis stream.

use crate::error::Result;
use crate::types::{AnalysisResult, AnalysisStatus};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::debug;

const FRAME_MARKER: &str = "data:";

/// One decoded progress/result message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressFrame {
    pub status: AnalysisStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<AnalysisResult>,
}

impl ProgressFrame {
    /// Progress clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.round().clamp(0.0, 100.0) as u8
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// Splits a byte stream into lines and decodes the framed ones.
///
/// Bytes are buffered until a newline arrives, so frames (and multi-byte
/// characters) split across network reads are reassembled. Lines without
/// the frame marker and frames whose JSON does not parse are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<ProgressFrame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = self.decode_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decodes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<ProgressFrame> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        self.decode_line(&rest)
    }

    /// Frames that carried the marker but could not be parsed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<ProgressFrame> {
        let line = String::from_utf8_lossy(raw);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        let payload = line.strip_prefix(FRAME_MARKER)?.trim();
        if payload.is_empty() {
            return None;
        }

        match serde_json::from_str::<ProgressFrame>(payload) {
            Ok(frame) => {
                debug!(status = %frame.status, progress = frame.progress, "frame");
                Some(frame)
            }
            Err(err) => {
                self.skipped += 1;
                debug!("skipping malformed frame: {err}");
                None
            }
        }
    }
}

/// Turns a body stream into a stream of frames, in arrival order.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_frames<S>(body: S) -> impl Stream<Item = Result<ProgressFrame>>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    struct State<S> {
        body: S,
        decoder: FrameDecoder,
        pending: VecDeque<ProgressFrame>,
        finished: bool,
    }

    let init = State {
        body,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(init, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let frames = st.decoder.push(&bytes);
                    st.pending.extend(frames);
                }
                Some(Err(err)) => {
                    st.finished = true;
                    return Some((Err(err), st));
                }
                None => {
                    st.finished = true;
                    let last = st.decoder.finish();
                    st.pending.extend(last);
                }
            }
        }
    })
}
