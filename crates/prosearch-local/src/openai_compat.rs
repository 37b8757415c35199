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

fn openai_compat_base_url_from_env() -> Option<String> {
    env("PROSEARCH_OPENAI_COMPAT_BASE_URL")
}

fn openai_compat_api_key_from_env() -> Option<String> {
    env("PROSEARCH_OPENAI_COMPAT_API_KEY")
}

fn openai_compat_model_from_env() -> Option<String> {
    env("PROSEARCH_OPENAI_COMPAT_MODEL")
}

pub fn openai_compat_configured() -> bool {
    openai_compat_base_url_from_env().is_some() && openai_compat_model_from_env().is_some()
}

const COMPLETE_TIMEOUT_MS: u64 = 120_000;
const STREAM_TIMEOUT_MS: u64 = 300_000;

/// Any server speaking the `/v1/chat/completions` protocol (OpenAI, vLLM, LM Studio, ...).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = openai_compat_base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing PROSEARCH_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let api_key = openai_compat_api_key_from_env();

        let model = model_override
            .or_else(openai_compat_model_from_env)
            .ok_or_else(|| {
                Error::NotConfigured(
                    "missing model for openai_compat (pass --model or set PROSEARCH_OPENAI_COMPAT_MODEL)"
                        .to_string(),
                )
            })?;

        Ok(Self::new(client, base_url, api_key, model))
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, prompt: &str, json_mode: bool, stream: bool) -> ChatCompletionsRequest {
        ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            response_format: json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
            stream: Some(stream),
        }
    }

    async fn send(&self, req: &ChatCompletionsRequest, timeout_ms: u64) -> Result<reqwest::Response> {
        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(Duration::from_millis(timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }
        Ok(resp)
    }

    async fn chat(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let resp = self
            .send(&self.request(prompt, json_mode, false), COMPLETE_TIMEOUT_MS)
            .await?;
        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        Ok(parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

/// One server-sent-events line of a streamed completion.
fn decode_sse_line(line: &str) -> Result<Line> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Line::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Line::Done);
    }
    let chunk: ChatCompletionsChunk = serde_json::from_str(data)
        .map_err(|e| Error::Llm(format!("openai_compat stream chunk: {e}")))?;
    Ok(Line::Text(
        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .unwrap_or_default(),
    ))
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(prompt, false).await
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        self.chat(prompt, true).await
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        let resp = self
            .send(&self.request(prompt, false, true), STREAM_TIMEOUT_MS)
            .await?;
        Ok(text_stream(resp.bytes_stream(), decode_sse_line))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}
