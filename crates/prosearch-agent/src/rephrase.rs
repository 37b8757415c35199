use crate::prompts;
use async_trait::async_trait;
use prosearch_core::{ChatMessage, LanguageModel, QueryRephraser, Result, Role};
use std::sync::Arc;

/// Rewrites follow-ups into standalone queries with a plain completion.
pub struct LlmRephraser {
    llm: Arc<dyn LanguageModel>,
}

impl LlmRephraser {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let who = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{who}: {}", m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Models like to quote the query or prefix it with a label.
fn clean_answer(raw: &str) -> &str {
    let s = raw.trim();
    let s = s
        .strip_prefix("Standalone query:")
        .or_else(|| s.strip_prefix("Standalone question:"))
        .unwrap_or(s)
        .trim();
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim()
}

#[async_trait]
impl QueryRephraser for LlmRephraser {
    async fn rephrase(&self, query: &str, history: &[ChatMessage]) -> Result<String> {
        if history.is_empty() {
            return Ok(query.to_string());
        }
        let prompt = prompts::fill(
            prompts::REPHRASE_PROMPT,
            &[("history", &format_history(history)), ("query", query)],
        );
        let raw = self.llm.complete(&prompt).await?;
        let cleaned = clean_answer(&raw);
        if cleaned.is_empty() {
            return Ok(query.to_string());
        }
        Ok(cleaned.to_string())
    }
}
