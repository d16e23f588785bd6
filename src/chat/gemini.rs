//! Gemini streaming backend.
//!
//! Talks to `{api_base}/models/{model}:streamGenerateContent?alt=sse`.
//! Each session keeps the `contents` history locally and resends it with
//! every turn; a turn is only committed to history once its reply streamed
//! to completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::{ChatBackend, ChatError, ChatSession, Chunk, ChunkStream};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CHANNEL_CAPACITY: usize = 64;
const MAX_ERROR_BODY: usize = 300;
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;

/// Connection settings for [`GeminiBackend`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    /// Longest silence tolerated between two stream reads.
    pub idle_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl GeminiConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }

    fn usable_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Backend that opens Gemini chat sessions.
pub struct GeminiBackend {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    async fn create_session(
        &self,
        system_instruction: &str,
    ) -> Result<Arc<dyn ChatSession>, ChatError> {
        let api_key = self.config.usable_key().ok_or_else(|| {
            ChatError::Configuration("No Gemini API key configured".to_string())
        })?;

        debug!(model = %self.config.model, "Opening Gemini session");
        Ok(Arc::new(GeminiSession {
            client: self.client.clone(),
            url: self.config.stream_url(),
            api_key: api_key.to_string(),
            system_instruction: system_instruction.to_string(),
            idle_timeout: self.config.idle_timeout,
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// One committed turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Turn {
    role: &'static str,
    text: String,
}

struct GeminiSession {
    client: reqwest::Client,
    url: String,
    api_key: String,
    system_instruction: String,
    idle_timeout: Duration,
    history: Arc<Mutex<Vec<Turn>>>,
}

impl GeminiSession {
    fn history_snapshot(&self) -> Vec<Turn> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send_message_stream(&self, text: &str) -> Result<ChunkStream, ChatError> {
        let body = build_request(&self.system_instruction, &self.history_snapshot(), text);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Stream(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_capped_error_body(response).await;
            return Err(ChatError::Stream(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_detail(&body)
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let history = Arc::clone(&self.history);
        let user_text = text.to_string();
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            match pump_stream(response, &tx, idle_timeout).await {
                Ok(Some(reply)) => {
                    if let Ok(mut history) = history.lock() {
                        history.push(Turn {
                            role: "user",
                            text: user_text,
                        });
                        history.push(Turn {
                            role: "model",
                            text: reply,
                        });
                    }
                }
                Ok(None) => debug!("Reply receiver dropped, stream abandoned"),
                Err(e) => {
                    warn!(error = %e, "Gemini stream failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(ChunkStream::new(rx))
    }
}

/// Forward chunks from `response` into `tx`.
///
/// Returns the full reply text on success, or `None` once the receiver is
/// gone.
async fn pump_stream(
    response: reqwest::Response,
    tx: &mpsc::Sender<Result<Chunk, ChatError>>,
    idle_timeout: Duration,
) -> Result<Option<String>, ChatError> {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut reply = String::new();

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            return Err(ChatError::Stream("Stream idle timeout".to_string()));
        };

        let (payloads, exhausted) = match next {
            Some(bytes) => {
                let bytes = bytes.map_err(|e| ChatError::Stream(e.to_string()))?;
                (decoder.push(&bytes), false)
            }
            None => (decoder.finish().into_iter().collect(), true),
        };

        for data in payloads {
            let event = parse_event(&data);
            for text in event.texts {
                reply.push_str(&text);
                if tx.send(Ok(Chunk::new(text))).await.is_err() {
                    return Ok(None);
                }
            }
            match event.outcome {
                Outcome::Continue => {}
                Outcome::Done => return Ok(Some(reply)),
                Outcome::Error(message) => return Err(ChatError::Stream(message)),
            }
        }

        if exhausted {
            return Ok(Some(reply));
        }
    }
}

fn build_request(system_instruction: &str, history: &[Turn], text: &str) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|turn| json!({ "role": turn.role, "parts": [{ "text": turn.text }] }))
        .collect();
    contents.push(json!({ "role": "user", "parts": [{ "text": text }] }));

    json!({
        "systemInstruction": { "parts": [{ "text": system_instruction }] },
        "contents": contents,
    })
}

/// Read an error body, stopping after [`MAX_ERROR_BODY_BYTES`].
async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            return format!("{}...(truncated)", String::from_utf8_lossy(&body));
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Pull a readable message out of an error response body.
fn error_detail(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body) {
        if let Some(message) = parsed.error.message.filter(|m| !m.is_empty()) {
            return message;
        }
    }

    let body = body.trim();
    if body.is_empty() {
        return "empty response body".to_string();
    }
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

// ========================================================================
// Response parsing
// ========================================================================

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
    prompt_feedback: Option<PromptFeedback>,
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
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Continue,
    Done,
    Error(String),
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedEvent {
    texts: Vec<String>,
    outcome: Outcome,
}

fn parse_event(data: &str) -> ParsedEvent {
    let response: StreamResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            warn!(%e, "Failed to parse Gemini SSE event");
            return ParsedEvent {
                texts: Vec::new(),
                outcome: Outcome::Continue,
            };
        }
    };

    if let Some(error) = response.error {
        let message = error
            .message
            .or(error.status)
            .unwrap_or_else(|| "Unknown API error".to_string());
        return ParsedEvent {
            texts: Vec::new(),
            outcome: Outcome::Error(message),
        };
    }

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return ParsedEvent {
            texts: Vec::new(),
            outcome: Outcome::Error(format!("Prompt blocked: {reason}")),
        };
    }

    let mut texts = Vec::new();
    let mut outcome = Outcome::Continue;

    for candidate in response.candidates {
        // Content first: the final event carries text and finishReason together.
        if let Some(content) = candidate.content {
            texts.extend(
                content
                    .parts
                    .into_iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text)
                    .filter(|text| !text.is_empty()),
            );
        }

        if let Some(reason) = candidate.finish_reason {
            outcome = finish_outcome(&reason);
        }
    }

    ParsedEvent { texts, outcome }
}

fn finish_outcome(reason: &str) -> Outcome {
    match reason {
        "STOP" | "MAX_TOKENS" => Outcome::Done,
        "FINISH_REASON_UNSPECIFIED" => Outcome::Continue,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" => {
            Outcome::Error("Response blocked by safety filters".to_string())
        }
        "RECITATION" => Outcome::Error("Response blocked due to recitation".to_string()),
        other => Outcome::Error(format!("Response ended early: {other}")),
    }
}
