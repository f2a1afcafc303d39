//! Gemini text generation, as a single response or a stream of fragments.

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, ClientBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};

/// Incremental text fragments of one model response. Finite and not
/// restartable; concatenating every fragment gives the full response.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

#[async_trait]
pub trait SummaryModel: Send + Sync {
    /// Starts a response to the conversation and returns its fragments as
    /// they arrive.
    async fn generate_stream(&self, turns: &[Turn]) -> Result<TextStream>;

    /// Returns the complete response to the conversation.
    async fn generate(&self, turns: &[Turn]) -> Result<String> {
        let stream = self.generate_stream(turns).await?;
        collect_text(stream).await
    }
}

pub const NO_TEXT: &str = "Model returned no text";

/// Concatenates every fragment of `stream`. The first error aborts the
/// collection and the partial text is dropped; a response without any text
/// is an error.
pub async fn collect_text(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    require_text(text)
}

fn require_text(text: String) -> Result<String> {
    if text.is_empty() {
        return Err(AppError::LlmError(NO_TEXT.to_string()));
    }
    Ok(text)
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: Role,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl GenerateResponse {
    /// Text of the first candidate, without thinking parts. Blocked prompts
    /// and candidates stopped without text are errors carrying the reason.
    fn into_text(self) -> Result<String> {
        if let Some(error) = self.error {
            return Err(AppError::LlmError(error.message));
        }
        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(AppError::LlmError(format!("Prompt blocked by the model: {}", reason)));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(String::new());
        };
        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        match candidate.finish_reason.as_deref() {
            Some(reason) if text.is_empty() && !matches!(reason, "STOP" | "MAX_TOKENS") => {
                Err(AppError::LlmError(format!("{} (finish reason: {})", NO_TEXT, reason)))
            }
            _ => Ok(text),
        }
    }
}

fn request_body(turns: &[Turn]) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: turns
            .iter()
            .map(|turn| Content {
                role: turn.role,
                parts: vec![RequestPart { text: &turn.text }],
            })
            .collect(),
    }
}

/// Splits a server-sent event byte stream into `data` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds raw bytes and returns the payloads of every event completed by
    /// them. Events may span any number of calls.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            payloads.extend(Self::data_of(&event[..end]));
        }
        payloads
    }

    /// Flushes a final event that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let event = std::mem::take(&mut self.buffer);
        Self::data_of(&event).into_iter().collect()
    }

    fn data_of(event: &[u8]) -> Option<String> {
        let event = String::from_utf8_lossy(event);
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
            .collect();

        if data.is_empty() {
            None
        } else {
            Some(data.join("\n"))
        }
    }
}

struct SseState<S> {
    bytes: S,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    finished: bool,
}

/// Turns a Gemini SSE byte stream into text fragments.
pub fn sse_text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        bytes,
        decoder: SseDecoder::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::try_unfold(state, next_fragment))
}

async fn next_fragment<S, B, E>(mut state: SseState<S>) -> Result<Option<(String, SseState<S>)>>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    loop {
        if let Some(payload) = state.ready.pop_front() {
            if payload.trim() == "[DONE]" {
                return Ok(None);
            }
            let response: GenerateResponse = serde_json::from_str(&payload)
                .map_err(|e| AppError::LlmError(format!("Invalid stream payload: {}", e)))?;
            let text = response.into_text()?;
            if !text.is_empty() {
                return Ok(Some((text, state)));
            }
            continue;
        }

        if state.finished {
            return Ok(None);
        }

        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                let payloads = state.decoder.push(chunk.as_ref());
                state.ready.extend(payloads);
            }
            Some(Err(e)) => {
                return Err(AppError::LlmError(format!("Stream error: {}", e)));
            }
            None => {
                state.finished = true;
                let payloads = state.decoder.finish();
                state.ready.extend(payloads);
            }
        }
    }
}

pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Result<Self> {
        // No overall timeout: long summaries stream for minutes.
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.api_base, self.model, method)
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::LlmError(format!("Gemini API error ({}): {}", status, body)))
    }
}

#[async_trait]
impl SummaryModel for GeminiClient {
    async fn generate_stream(&self, turns: &[Turn]) -> Result<TextStream> {
        debug!(model = %self.model, turns = turns.len(), "Starting streaming generation");

        let response = self
            .client
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&request_body(turns))
            .send()
            .await
            .map_err(|e| AppError::LlmError(format!("Network error: {}", e)))?;

        let response = Self::check_status(response).await?;
        Ok(sse_text_stream(Box::pin(response.bytes_stream())))
    }

    async fn generate(&self, turns: &[Turn]) -> Result<String> {
        debug!(model = %self.model, turns = turns.len(), "Starting generation");

        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(turns))
            .send()
            .await
            .map_err(|e| AppError::LlmError(format!("Network error: {}", e)))?;

        let response = Self::check_status(response).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| {
                AppError::LlmError(format!("Invalid response format from LLM: {}", e))
            })?;
        require_text(body.into_text()?)
    }
}
