//! Concrete collaborators for `prosearch`: HTTP language models, web search providers and
//! turn stores. Everything here is configured from `PROSEARCH_*` environment variables.

use prosearch_core::{Error, LanguageModel, Result, SearchProvider};
use std::sync::Arc;
use std::time::Duration;

pub mod ollama;
pub mod openai_compat;
pub mod search;
pub mod store;
mod stream;
#[cfg(test)]
mod test_env;

pub use ollama::{ollama_configured, OllamaClient, OLLAMA_PREFIX};
pub use openai_compat::{openai_compat_configured, OpenAiCompatClient};
pub use search::{
    searxng_endpoints_from_env, tavily_configured, SearxngSearchProvider, TavilySearchProvider,
};
pub use store::{FsTurnStore, MemoryTurnStore, StoredTurn, Thread};

/// Shared client for every collaborator. Per-request timeouts are set by each adapter.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("prosearch-local/0.1")
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::NotConfigured(format!("http client: {e}")))
}

/// Pick an LLM backend.
///
/// An `ollama/` model always goes to Ollama. Otherwise the OpenAI-compatible backend is used
/// when its base URL is set, and Ollama is the last resort.
pub fn llm_from_env(
    client: reqwest::Client,
    model: Option<String>,
) -> Result<Arc<dyn LanguageModel>> {
    let wants_ollama = model
        .as_deref()
        .is_some_and(|m| m.starts_with(OLLAMA_PREFIX));
    if wants_ollama {
        return Ok(Arc::new(OllamaClient::from_env(client, model)?));
    }
    match OpenAiCompatClient::from_env(client.clone(), model.clone()) {
        Ok(c) => Ok(Arc::new(c)),
        Err(Error::NotConfigured(why)) => {
            tracing::debug!(reason = %why, "openai_compat not configured; trying ollama");
            Ok(Arc::new(OllamaClient::from_env(client, model)?))
        }
        Err(e) => Err(e),
    }
}

/// Pick a search backend by name (`searxng` or `tavily`), or the first one configured.
pub fn search_from_env(
    client: reqwest::Client,
    provider: Option<&str>,
) -> Result<Arc<dyn SearchProvider>> {
    match provider.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
        Some("searxng") => Ok(Arc::new(SearxngSearchProvider::from_env(client)?)),
        Some("tavily") => Ok(Arc::new(TavilySearchProvider::from_env(client)?)),
        Some(other) => Err(Error::NotConfigured(format!(
            "unknown search provider: {other} (expected searxng or tavily)"
        ))),
        None if !searxng_endpoints_from_env().is_empty() => {
            Ok(Arc::new(SearxngSearchProvider::from_env(client)?))
        }
        None if tavily_configured() => Ok(Arc::new(TavilySearchProvider::from_env(client)?)),
        None => Err(Error::NotConfigured(
            "no search provider configured (set PROSEARCH_SEARXNG_ENDPOINT or PROSEARCH_TAVILY_API_KEY)"
                .to_string(),
        )),
    }
}
