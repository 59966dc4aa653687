use super::{
    AnalysisStream, HEADER_API_KEY, HEADER_CHART_PROMPT, HEADER_MINERU_API_KEY, HEADER_TASK_ID,
    HEADER_VISION_MODEL, Transport, types::*,
};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::types::{AnalysisOptions, Credentials, DocumentSource, ImageAnalysis};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// [`Transport`] over the analyzer's HTTP API.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    analyzer_prefix: Vec<String>,
    translate_path: Vec<String>,
    cancel_timeout: Duration,
}

impl HttpTransport {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.server.base_url).map_err(|e| {
            IngestError::validation(format!("invalid server.base_url {}: {e}", cfg.server.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(IngestError::validation(format!(
                "server.base_url cannot be a base: {}",
                cfg.server.base_url
            )));
        }

        // No overall timeout: the analysis stream may legitimately run for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.server.connect_timeout_seconds.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url,
            analyzer_prefix: path_segments(&cfg.server.analyzer_prefix),
            translate_path: path_segments(&cfg.server.translate_path),
            cancel_timeout: Duration::from_millis(cfg.server.cancel_timeout_ms.max(1)),
        })
    }

    fn endpoint(&self, prefix: &[String], tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IngestError::validation("server.base_url cannot be a base"))?
            .pop_if_empty()
            .extend(prefix)
            .extend(tail);
        Ok(url)
    }

    fn analyzer_endpoint(&self, tail: &[&str]) -> Result<Url> {
        self.endpoint(&self.analyzer_prefix, tail)
    }

    async fn send(&self, req: RequestBuilder, signal: &CancellationToken) -> Result<Response> {
        let resp = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(IngestError::Cancelled),
            resp = req.send() => resp?,
        };
        ensure_success(resp).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_analysis(
        &self,
        options: &AnalysisOptions,
        credentials: &Credentials,
        signal: &CancellationToken,
    ) -> Result<AnalysisStream> {
        let url = self.analyzer_endpoint(&["analyze", "stream"])?;

        let form = match &options.source {
            DocumentSource::File { name, bytes } => Form::new().part(
                "file",
                Part::bytes(bytes.clone())
                    .file_name(name.clone())
                    .mime_str("application/pdf")?,
            ),
            DocumentSource::Url(u) => Form::new().text("url", u.trim().to_string()),
        }
        .text("translate", options.translate.to_string())
        .text("extract_charts", options.extract_charts.to_string())
        .text("enable_paper_analysis", options.enable_paper_analysis.to_string());

        debug!("POST {url}");
        let req = self
            .client
            .post(url)
            .header(HEADER_API_KEY, &credentials.api_key)
            .header(HEADER_MINERU_API_KEY, &credentials.mineru_api_key)
            .multipart(form);
        let resp = self.send(req, signal).await?;

        let task_id = resp
            .headers()
            .get(HEADER_TASK_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(IngestError::from))
            .take_until(signal.clone().cancelled_owned())
            .boxed();

        Ok(AnalysisStream { task_id, body })
    }

    async fn cancel_task(&self, task_id: &str, credentials: &Credentials) -> Result<()> {
        let url = self.analyzer_endpoint(&["cancel", task_id])?;
        debug!("POST {url}");
        let resp = self
            .client
            .post(url)
            .header(HEADER_API_KEY, &credentials.api_key)
            .timeout(self.cancel_timeout)
            .send()
            .await?;
        debug!("cancel {task_id} answered {}", resp.status());
        Ok(())
    }

    async fn translate(
        &self,
        req: &TranslateRequest,
        api_key: &str,
        signal: &CancellationToken,
    ) -> Result<String> {
        let url = self.endpoint(&self.translate_path, &[])?;
        let builder = self
            .client
            .post(url)
            .header(HEADER_API_KEY, api_key)
            .json(req);
        let resp = self.send(builder, signal).await?;
        let out: TranslateResponse = read_json(resp, signal).await?;
        Ok(out.translated_text)
    }

    async fn analyze_image(
        &self,
        image_id: &str,
        req: &ImageAnalysisRequest,
        signal: &CancellationToken,
    ) -> Result<ImageAnalysis> {
        let url = self.analyzer_endpoint(&["analyze-image", image_id])?;
        let mut builder = self.client.post(url).header(HEADER_API_KEY, &req.api_key);
        if let Some(model) = req.vision_model.as_deref() {
            builder = builder.header(HEADER_VISION_MODEL, model);
        }
        if let Some(prompt) = req.chart_prompt.as_deref() {
            builder = builder.header(HEADER_CHART_PROMPT, prompt);
        }
        let resp = self.send(builder, signal).await?;
        let out: ImageAnalysisResponse = read_json(resp, signal).await?;
        out.analysis.ok_or_else(|| {
            IngestError::Decode(format!("no analysis returned for image {image_id}"))
        })
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus> {
        let url = self.analyzer_endpoint(&["task", task_id])?;
        let resp = self.send(self.client.get(url), &CancellationToken::new()).await?;
        Ok(resp.json().await?)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    resp: Response,
    signal: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(IngestError::Cancelled),
        out = resp.json::<T>() => Ok(out?),
    }
}

async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(IngestError::Http {
        status: status.as_u16(),
        message: http_error_message(status, &body),
    })
}

/// Prefers the `detail`/`message` field of a JSON error body, else the status line.
pub fn http_error_message(status: StatusCode, body: &str) -> String {
    let from_body = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|k| v.get(k).and_then(|d| d.as_str()).map(str::to_owned))
        })
        .filter(|m| !m.trim().is_empty());

    from_body.unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => format!("HTTP error {} {reason}", status.as_u16()),
        None => format!("HTTP error {}", status.as_u16()),
    })
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
