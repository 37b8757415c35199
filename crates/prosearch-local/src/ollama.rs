use crate::stream::{text_stream, Line};
use prosearch_core::{Error, LanguageModel, Result, TextStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Prefix that marks a model name as served by Ollama.
pub const OLLAMA_PREFIX: &str = "ollama/";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const COMPLETE_TIMEOUT_MS: u64 = 180_000;
const STREAM_TIMEOUT_MS: u64 = 600_000;

pub fn ollama_configured() -> bool {
    env("PROSEARCH_OLLAMA_MODEL").is_some()
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    display_name: String,
}

impl OllamaClient {
    /// `model` may carry the `ollama/` prefix; it is stripped for the API.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: &str) -> Self {
        let model = model
            .strip_prefix(OLLAMA_PREFIX)
            .unwrap_or(model)
            .to_string();
        Self {
            client,
            base_url: base_url.into(),
            display_name: format!("{OLLAMA_PREFIX}{model}"),
            model,
        }
    }

    /// Opt-in: requires a model, either passed in or from `PROSEARCH_OLLAMA_MODEL`, so
    /// nothing calls localhost unless asked to.
    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let model = model_override
            .or_else(|| env("PROSEARCH_OLLAMA_MODEL"))
            .ok_or_else(|| {
                Error::NotConfigured(
                    "missing model for ollama (pass --model ollama/<name> or set PROSEARCH_OLLAMA_MODEL)"
                        .to_string(),
                )
            })?;
        let base_url =
            env("PROSEARCH_OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(client, base_url, &model))
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, prompt: &str, json_mode: bool, stream: bool) -> Result<reqwest::Response> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            format: json_mode.then(|| "json".to_string()),
            stream,
        };
        let timeout_ms = if stream {
            STREAM_TIMEOUT_MS
        } else {
            COMPLETE_TIMEOUT_MS
        };

        let resp = self
            .client
            .post(self.endpoint_chat())
            .timeout(Duration::from_millis(timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("ollama chat HTTP {status}")));
        }
        Ok(resp)
    }

    async fn chat(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let resp = self.send(prompt, json_mode, false).await?;
        let parsed: ChatResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        if let Some(e) = parsed.error {
            return Err(Error::Llm(format!("ollama: {e}")));
        }
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }
}

/// One NDJSON line of a streamed chat.
fn decode_ndjson_line(line: &str) -> Result<Line> {
    let chunk: ChatResponse = serde_json::from_str(line)
        .map_err(|e| Error::Llm(format!("ollama stream chunk: {e}")))?;
    if let Some(e) = chunk.error {
        return Err(Error::Llm(format!("ollama: {e}")));
    }
    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    if chunk.done && text.is_empty() {
        return Ok(Line::Done);
    }
    Ok(Line::Text(text))
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.display_name
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(prompt, false).await
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        self.chat(prompt, true).await
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        let resp = self.send(prompt, false, true).await?;
        Ok(text_stream(resp.bytes_stream(), decode_ndjson_line))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}
