/// LLM Client — the single point of entry for all generation API calls.
///
/// ARCHITECTURAL RULE: No other module may call the generation API directly.
/// Chat code depends on the `GenerationApi` trait; `LlmClient` is its only network impl.
///
/// Wire protocol: OpenAI-compatible `/chat/completions` with `stream: true`.
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::chat::normalizer::{Turn, TurnRole};

pub mod sse;

use sse::{SseDecoder, SseEvent};

pub const DEFAULT_API_URL: &str = "https://ai.hackclub.com/proxy/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "qwen/qwen3-32b";
const MAX_RETRIES: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait for the response head, and then for each body chunk. Long replies are never cut
/// while chunks keep arriving.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("No API credential configured")]
    MissingCredential,

    #[error("API credential rejected (status {status})")]
    InvalidCredential { status: u16 },

    #[error("Blocked by content safety: {0}")]
    SafetyBlocked(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Upstream stream error: {0}")]
    Upstream(String),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("No response from the generation API within {0:?}")]
    Timeout(Duration),
}

/// Explicit generation settings, built once from `Config` at startup.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
}

/// Ordered, finite reply fragments. Dropping the stream releases the request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Persona-aware streaming chat. Implement this to swap upstreams (or fake one in tests).
#[async_trait]
pub trait GenerationApi: Send + Sync {
    async fn stream_reply(
        &self,
        system_instruction: &str,
        history: &[Turn],
        new_user_text: &str,
    ) -> Result<FragmentStream, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Maps the normalized-history vocabulary onto the upstream wire roles.
fn wire_role(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Model => "assistant",
    }
}

fn build_request<'a>(
    config: &'a GenerationConfig,
    system_instruction: &'a str,
    history: &'a [Turn],
    new_user_text: &'a str,
) -> ChatCompletionRequest<'a> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(WireMessage {
        role: "system",
        content: system_instruction,
    });
    messages.extend(history.iter().map(|turn| WireMessage {
        role: wire_role(turn.role),
        content: &turn.text,
    }));
    messages.push(WireMessage {
        role: "user",
        content: new_user_text,
    });

    ChatCompletionRequest {
        model: &config.model,
        messages,
        stream: true,
        temperature: config.temperature,
    }
}

/// Classifies a non-success, non-retryable upstream response.
fn classify_failure(status: StatusCode, body: &str) -> LlmError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return LlmError::InvalidCredential {
            status: status.as_u16(),
        };
    }

    let (message, code) = match serde_json::from_str::<ApiError>(body) {
        Ok(e) => (e.error.message, e.error.code.map(|c| c.to_string())),
        Err(_) => (body.to_string(), None),
    };

    let lowered = format!("{} {}", message, code.unwrap_or_default()).to_lowercase();
    if ["content_filter", "content policy", "safety"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return LlmError::SafetyBlocked(message);
    }

    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

/// The single generation client used by the chat core.
/// Wraps the chat-completions API with retry logic before the first byte.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: GenerationConfig,
}

impl LlmClient {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn has_credential(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Opens the streaming response.
    /// Retries on connect failures, 429 and 5xx with exponential backoff.
    async fn open(
        &self,
        api_key: &str,
        body: &ChatCompletionRequest<'_>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Generation attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let request = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(api_key)
                .header("content-type", "application/json")
                .header("accept", "text/event-stream")
                .json(body)
                .send();

            let response = match tokio::time::timeout(RESPONSE_TIMEOUT, request).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
                Err(_) => {
                    last_error = Some(LlmError::Timeout(RESPONSE_TIMEOUT));
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Generation API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_failure(status, &body));
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl GenerationApi for LlmClient {
    async fn stream_reply(
        &self,
        system_instruction: &str,
        history: &[Turn],
        new_user_text: &str,
    ) -> Result<FragmentStream, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingCredential)?;

        let body = build_request(&self.config, system_instruction, history, new_user_text);
        let response = self.open(api_key, &body).await?;

        debug!(
            "Generation stream opened: model={}, history_turns={}",
            self.config.model,
            history.len()
        );

        Ok(Box::pin(fragments(response.bytes_stream(), IDLE_TIMEOUT)))
    }
}

/// Turns the raw event-stream body into text fragments.
/// Ends on `[DONE]` or at end of body, whichever comes first. Fails with `Timeout` when
/// no chunk arrives for `idle`.
fn fragments<S>(body: S, idle: Duration) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();
        let mut done = false;

        'read: loop {
            let chunk = match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break 'read,
                Err(_) => Err::<Bytes, _>(LlmError::Timeout(idle))?,
            };
            for event in decoder.push(&chunk) {
                match event {
                    SseEvent::Delta(text) => yield text,
                    SseEvent::Done => {
                        done = true;
                        break 'read;
                    }
                    SseEvent::Blocked(reason) => Err::<(), _>(LlmError::SafetyBlocked(reason))?,
                    SseEvent::Failed(message) => Err::<(), _>(LlmError::Upstream(message))?,
                }
            }
        }

        // Only non-empty when the body ended on a line without a trailing newline.
        if !done {
            match decoder.finish() {
                Some(SseEvent::Delta(text)) => yield text,
                Some(SseEvent::Blocked(reason)) => Err::<(), _>(LlmError::SafetyBlocked(reason))?,
                Some(SseEvent::Failed(message)) => Err::<(), _>(LlmError::Upstream(message))?,
                Some(SseEvent::Done) | None => {}
            }
        }
    }
}
