//! OpenAI-Compatible Backend
//!
//! Backend for any provider that speaks the `/chat/completions` API
//! (DashScope compatible mode, DeepSeek, vLLM, ...).
//!
//! # Streaming
//!
//! Streaming responses are server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hi "}}]}
//!
//! data: {"choices":[{"delta":{"content":"there."}}]}
//!
//! data: [DONE]
//! ```
//!
//! The returned stream pulls from the HTTP body lazily. Dropping it drops the
//! response and closes the connection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

use super::delta::into_incremental;
use super::traits::{
    ChunkStream, InferenceBackend, InferenceRequest, InferenceResponse, PromptMessage,
};

/// Default endpoint (DashScope compatible mode)
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenAiCompatConfig {
    /// API root, without the `/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Backend resends the full answer with every event
    pub cumulative_output: bool,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            cumulative_output: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    enable_search: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// One parsed SSE line
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Chunk(String),
    Done,
    Error(String),
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, BackendError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` lines
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| BackendError::fatal(format!("malformed stream event: {e}")))?;
    if let Some(error) = chunk.error {
        return Ok(SseLine::Error(error.message));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Chunk(text))
    }
}

const TRUNCATED_STREAM: &str = "stream ended before [DONE]";

/// Line-buffered SSE decoder over an HTTP body
struct SseDecoder {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, BackendError>>,
    finished: bool,
}

impl SseDecoder {
    fn new(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&raw));
            if self.finished {
                self.buffer.clear();
                return;
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        match parse_sse_line(line) {
            Ok(SseLine::Chunk(text)) => self.pending.push_back(Ok(text)),
            Ok(SseLine::Skip) => {}
            Ok(SseLine::Done) => self.finished = true,
            Ok(SseLine::Error(message)) => {
                self.pending.push_back(Err(BackendError::fatal(message)));
                self.finished = true;
            }
            Err(err) => {
                self.pending.push_back(Err(err));
                self.finished = true;
            }
        }
    }

    async fn next_item(&mut self) -> Option<Result<String, BackendError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }
            match self.body.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_lines();
                }
                Some(Err(err)) => {
                    self.pending.push_back(Err(err.into()));
                    self.finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut self.buffer);
                    if !rest.is_empty() {
                        self.handle_line(&String::from_utf8_lossy(&rest));
                    }
                    if !self.finished {
                        // Body closed without [DONE]; the answer is incomplete
                        self.pending
                            .push_back(Err(BackendError::retryable(TRUNCATED_STREAM)));
                        self.finished = true;
                    }
                }
            }
        }
    }

    fn into_stream(self) -> ChunkStream {
        stream::unfold(self, |mut decoder| async move {
            let item = decoder.next_item().await?;
            Some((item, decoder))
        })
        .boxed()
    }
}

/// OpenAI-compatible HTTP backend
#[derive(Clone, Debug)]
pub struct OpenAiCompatBackend {
    config: OpenAiCompatConfig,
    http_client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a backend from `config`
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (TLS backend unavailable).
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| BackendError::fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url())
    }

    fn body<'a>(&self, request: &'a InferenceRequest, stream: bool) -> CompletionRequest<'a> {
        let params = &request.params;
        CompletionRequest {
            model: &params.model,
            messages: &request.messages,
            stream,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: (params.max_tokens > 0).then_some(params.max_tokens),
            enable_search: params.enable_search,
        }
    }

    async fn post(&self, body: &CompletionRequest<'_>) -> Result<reqwest::Response, BackendError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BackendError::fatal("invalid api key"))?;

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(BackendError::from_status(status.as_u16(), text))
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn submit(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let start = Instant::now();
        let response = self.post(&self.body(request, false)).await?;
        let parsed: CompletionResponse = response.json().await?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::fatal("backend returned no answer"))?;

        tracing::debug!(
            model = %request.params.model,
            chars = content.len(),
            "Completion received"
        );

        Ok(InferenceResponse {
            content,
            model: parsed.model.unwrap_or_else(|| request.params.model.clone()),
            tokens_used: parsed.usage.and_then(|u| u.total_tokens),
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    async fn submit_streaming(
        &self,
        request: &InferenceRequest,
    ) -> Result<ChunkStream, BackendError> {
        let response = self.post(&self.body(request, true)).await?;
        tracing::debug!(
            model = %request.params.model,
            search = request.params.enable_search,
            "Streaming completion started"
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        let chunks = SseDecoder::new(body).into_stream();

        if self.config.cumulative_output {
            Ok(into_incremental(chunks))
        } else {
            Ok(chunks)
        }
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(format!("{}/models", self.base_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }
}
