use crate::config::LlmConfig;
use crate::error::{ReliefError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Lazily produced text fragments, yielded in emission order.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Message in OpenAI chat format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// A chat-completion endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Start a completion and return its fragments as they arrive.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    /// Drain `stream` and concatenate every fragment.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut fragments = self.stream(messages).await?;
        let mut full = String::new();
        while let Some(fragment) = fragments.next().await {
            full.push_str(&fragment?);
        }
        Ok(full)
    }
}

/// Run `complete` under a deadline.
pub async fn complete_with_timeout(
    model: &dyn LanguageModel,
    messages: &[ChatMessage],
    limit: Duration,
) -> Result<String> {
    match tokio::time::timeout(limit, model.complete(messages)).await {
        Ok(result) => result,
        Err(_) => Err(ReliefError::Timeout {
            operation: "LLM call",
            seconds: limit.as_secs(),
        }),
    }
}

/// OpenAI-compatible client (DashScope compatible mode by default).
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ReliefError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": self.temperature,
        });
        debug!(model = %self.model, messages = messages.len(), "Sending chat completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReliefError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ReliefError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec())),
        );
        Ok(sse_fragments(body))
    }
}

type ByteStream = Pin<Box<dyn futures::Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.pending.push_back(Ok(text)),
                SseEvent::Done => {
                    self.finished = true;
                    break;
                }
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(ReliefError::Llm(message)));
                    self.finished = true;
                    break;
                }
            }
        }
    }
}

/// Turn a server-sent-event byte stream into content fragments.
fn sse_fragments<S, E>(body: S) -> TokenStream
where
    S: futures::Stream<Item = std::result::Result<Vec<u8>, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(&chunk);
                    st.enqueue(events);
                }
                Some(Err(e)) => {
                    st.pending
                        .push_back(Err(ReliefError::Llm(format!("LLM stream interrupted: {}", e))));
                    st.finished = true;
                }
                None => {
                    let events = st.decoder.finish();
                    st.enqueue(events);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Incremental `data:` line decoder. Chunks may split lines (and UTF-8
/// sequences) anywhere; only complete lines are decoded.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&rest)).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping malformed stream chunk: {}", e);
            return None;
        }
    };

    if let Some(error) = value.get("error") {
        return Some(SseEvent::Error(format!("LLM API error: {}", error)));
    }

    let choice = value.get("choices").and_then(|c| c.get(0))?;
    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Some(SseEvent::Error(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| SseEvent::Delta(c.to_string()))
}
