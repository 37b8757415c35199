use crate::execute::build_context;
use crate::prompts;
use crate::repair::{parse_lenient_value, string_list_from_value};
use prosearch_core::{LanguageModel, SearchResult};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

const RELATED_KEYS: &[&str] = &["related_questions", "related_queries", "questions"];

/// Follow-up question generator. Failures degrade to an empty list.
#[derive(Clone)]
pub struct RelatedQuestions {
    llm: Arc<dyn LanguageModel>,
    count: usize,
    context_chars: usize,
    local_model: bool,
}

impl RelatedQuestions {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        count: usize,
        context_chars: usize,
        local_model: bool,
    ) -> Self {
        Self {
            llm,
            count,
            context_chars,
            local_model,
        }
    }

    pub async fn generate(&self, query: &str, results: &[SearchResult]) -> Vec<String> {
        if self.count == 0 {
            return Vec::new();
        }
        let prompt = prompts::fill(
            prompts::RELATED_QUESTIONS_PROMPT,
            &[
                ("count", &self.count.to_string()),
                ("query", query),
                ("context", &build_context(results, self.context_chars)),
            ],
        );
        let raw = match self
            .llm
            .complete_json(&prompts::for_model(&prompt, self.local_model))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "related questions failed");
                return Vec::new();
            }
        };
        let mut questions = parse_lenient_value(&raw)
            .and_then(|v| string_list_from_value(&v, RELATED_KEYS))
            .unwrap_or_else(|| {
                warn!(raw_len = raw.len(), "related questions did not decode");
                Vec::new()
            });
        questions.truncate(self.count);
        questions
    }

    /// Start generation now on the runtime, or defer it to [`RelatedTask::finish`] for local
    /// models so they are not asked to answer and suggest at the same time.
    pub fn start(&self, query: &str, results: &[SearchResult]) -> RelatedTask {
        let generator = self.clone();
        let query = query.to_string();
        let results = results.to_vec();
        if self.local_model {
            RelatedTask::Deferred {
                generator,
                query,
                results,
            }
        } else {
            RelatedTask::Running(AbortOnDrop(tokio::spawn(async move {
                generator.generate(&query, &results).await
            })))
        }
    }
}

/// Aborts the spawned generation when the run abandons it before [`RelatedTask::finish`].
pub struct AbortOnDrop(JoinHandle<Vec<String>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub enum RelatedTask {
    Running(AbortOnDrop),
    Deferred {
        generator: RelatedQuestions,
        query: String,
        results: Vec<SearchResult>,
    },
}

impl RelatedTask {
    pub fn is_running(&self) -> bool {
        matches!(self, RelatedTask::Running(_))
    }

    pub async fn finish(self) -> Vec<String> {
        match self {
            RelatedTask::Running(mut handle) => (&mut handle.0).await.unwrap_or_else(|e| {
                warn!(error = %e, "related questions task failed");
                Vec::new()
            }),
            RelatedTask::Deferred {
                generator,
                query,
                results,
            } => generator.generate(&query, &results).await,
        }
    }
}
