use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod chat;
pub mod event;

pub use chat::{
    AgentSearchFullResponse, AgentSearchStep, ChatMessage, ChatRequest, Role, StepStatus,
    TurnRecord,
};
pub use event::StreamEvent;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("search failed: {0}")]
    Search(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("disabled: {0}")]
    Disabled(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a step plan is rejected at validation time.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("plan has {count} steps (max {max})")]
    TooManySteps { count: usize, max: usize },
    #[error("step id {0} is declared more than once")]
    DuplicateId(u32),
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: u32, dependency: u32 },
    #[error("step {step} depends on step {dependency}, which is not declared before it")]
    OutOfOrder { step: u32, dependency: u32 },
    #[error("terminal step {step} has no dependencies")]
    TerminalWithoutDependencies { step: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    /// Snippet or summary text returned by the provider.
    pub content: String,
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Title: {}\nURL: {}\nSummary: {}",
            self.title, self.url, self.content
        )
    }
}

/// Opaque image reference (an image url).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ImageResult(pub String);

impl ImageResult {
    pub fn url(&self) -> &str {
        &self.0
    }
}

impl From<String> for ImageResult {
    fn from(url: String) -> Self {
        Self(url)
    }
}

impl From<&str> for ImageResult {
    fn from(url: &str) -> Self {
        Self(url.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub language: Option<String>,
    /// Per-request timeout hint for the provider.
    pub timeout_ms: Option<u64>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: None,
            language: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub images: Vec<ImageResult>,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// Incremental completion text. Single consumer, finite, not restartable.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier as configured, e.g. `ollama/llama3.1` or `gpt-4o-mini`.
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Ask the backend for JSON-mode output and return the raw text.
    ///
    /// Backends without a JSON mode may fall back to `complete`. The output is not
    /// guaranteed to parse; callers decode it leniently.
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        self.complete(prompt).await
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream>;
}

#[async_trait::async_trait]
pub trait TurnStore: Send + Sync {
    /// Persist one chat turn and return the thread id it was stored under.
    ///
    /// A `None` thread id on the record starts a new thread.
    async fn save(&self, turn: TurnRecord) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait QueryRephraser: Send + Sync {
    /// Turn a follow-up query into a standalone query using the conversation so far.
    async fn rephrase(&self, query: &str, history: &[ChatMessage]) -> Result<String>;
}
