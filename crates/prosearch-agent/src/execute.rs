use crate::config::AgentConfig;
use crate::plan::PlanStep;
use crate::prompts;
use crate::repair;
use futures::future::try_join_all;
use prosearch_core::{
    AgentSearchStep, ImageResult, LanguageModel, Result, SearchProvider, SearchQuery,
    SearchResult, StepStatus,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Evidence note for one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub step_id: u32,
    pub step: String,
    /// Joined result summaries, capped at the step budget.
    pub context: String,
}

/// Round-robin merge: item 0 of every list, then item 1 of every list, and so on.
/// Exhausted lists are skipped; nothing is dropped.
pub fn interleave<T: Clone>(lists: &[Vec<T>]) -> Vec<T> {
    let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(lists.iter().map(Vec::len).sum());
    for i in 0..longest {
        for list in lists {
            if let Some(item) = list.get(i) {
                out.push(item.clone());
            }
        }
    }
    out
}

/// Keep the first result seen for each url.
pub fn dedup_results(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

pub fn dedup_images(images: impl IntoIterator<Item = ImageResult>) -> Vec<ImageResult> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|i| seen.insert(i.clone()))
        .collect()
}

/// First `max` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub fn build_context(results: &[SearchResult], budget: usize) -> String {
    let joined = results
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    truncate_chars(&joined, budget)
}

pub fn format_step_context(contexts: &[&StepContext]) -> String {
    contexts
        .iter()
        .map(|c| format!("Step: {}\nContext: {}", c.step, c.context))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run every query concurrently and merge by query position, not by arrival order.
pub async fn ranked_results_from_queries(
    search: &dyn SearchProvider,
    queries: &[String],
) -> Result<(Vec<SearchResult>, Vec<ImageResult>)> {
    let requests: Vec<SearchQuery> = queries.iter().map(SearchQuery::new).collect();
    let responses = try_join_all(requests.iter().map(|q| search.search(q))).await?;

    let (results, images): (Vec<_>, Vec<_>) =
        responses.into_iter().map(|r| (r.results, r.images)).unzip();
    let ranked = dedup_results(interleave(&results));
    let images = dedup_images(images.into_iter().flatten());
    debug!(
        queries = queries.len(),
        results = ranked.len(),
        images = images.len(),
        "search fan-out merged"
    );
    Ok((ranked, images))
}

/// Everything the run has learned so far, keyed by step id.
#[derive(Debug, Default)]
pub struct ResearchState {
    contexts: BTreeMap<u32, StepContext>,
    results: BTreeMap<u32, Vec<SearchResult>>,
    images: BTreeMap<u32, Vec<ImageResult>>,
    steps: Vec<AgentSearchStep>,
}

impl ResearchState {
    pub fn record(
        &mut self,
        step: &PlanStep,
        queries: Vec<String>,
        results: Vec<SearchResult>,
        images: Vec<ImageResult>,
        budget: usize,
    ) -> &StepContext {
        let context = build_context(&results, budget);
        self.steps.push(AgentSearchStep {
            step_number: step.id,
            step: step.step.clone(),
            queries,
            results: results.clone(),
            status: StepStatus::Done,
        });
        self.results.insert(step.id, results);
        self.images.insert(step.id, images);
        self.contexts.insert(
            step.id,
            StepContext {
                step_id: step.id,
                step: step.step.clone(),
                context,
            },
        );
        &self.contexts[&step.id]
    }

    /// The terminal step searches nothing; it is recorded with empty queries and results.
    pub fn record_terminal(&mut self, step: &PlanStep) {
        self.steps.push(AgentSearchStep {
            step_number: step.id,
            step: step.step.clone(),
            queries: Vec::new(),
            results: Vec::new(),
            status: StepStatus::Done,
        });
    }

    /// Contexts of `ids` in the order given. Ids that were never executed are skipped.
    pub fn contexts_for(&self, ids: &[u32]) -> Vec<&StepContext> {
        ids.iter().filter_map(|id| self.contexts.get(id)).collect()
    }

    pub fn context(&self, id: u32) -> Option<&StepContext> {
        self.contexts.get(&id)
    }

    pub fn results_for(&self, id: u32) -> &[SearchResult] {
        self.results.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn images_for(&self, id: u32) -> &[ImageResult] {
        self.images.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn steps(&self) -> &[AgentSearchStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<AgentSearchStep> {
        self.steps
    }
}

/// Generates queries for a research step and runs them.
pub struct StepExecutor {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    max_queries: usize,
    local_model: bool,
}

impl StepExecutor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        config: &AgentConfig,
        local_model: bool,
    ) -> Self {
        Self {
            llm,
            search,
            max_queries: config.max_queries_per_step.max(1),
            local_model,
        }
    }

    /// Search queries for `step`. Never fails: model or decode errors yield the synthetic
    /// query for the step.
    pub async fn search_queries(
        &self,
        query: &str,
        step: &PlanStep,
        dependencies: &[&StepContext],
    ) -> Vec<String> {
        let prompt = prompts::fill(
            prompts::SEARCH_QUERIES_PROMPT,
            &[
                ("query", query),
                ("context", &format_step_context(dependencies)),
                ("step", &step.step),
            ],
        );
        let raw = match self
            .llm
            .complete_json(&prompts::for_model(&prompt, self.local_model))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(step = step.id, error = %e, "query generation failed; using synthetic query");
                return vec![synthetic_query(&step.step)];
            }
        };
        match repair::repair_queries(&raw, self.max_queries) {
            Some(r) => r.value,
            None => {
                warn!(step = step.id, "no search queries decoded; using synthetic query");
                vec![synthetic_query(&step.step)]
            }
        }
    }

    pub async fn search(&self, queries: &[String]) -> Result<(Vec<SearchResult>, Vec<ImageResult>)> {
        ranked_results_from_queries(self.search.as_ref(), queries).await
    }
}

pub fn synthetic_query(step: &str) -> String {
    format!("Search for information about: {step}")
}
