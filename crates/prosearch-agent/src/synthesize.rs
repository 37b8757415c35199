use crate::execute::{dedup_results, truncate_chars, ResearchState};
use crate::prompts;
use crate::sink::EventSink;
use futures::StreamExt;
use prosearch_core::{ImageResult, LanguageModel, Result, SearchResult, StreamEvent};
use std::collections::BTreeSet;
use tracing::debug;

const STEP_SEPARATOR: &str = "--------------------";

/// Evidence handed to the answer step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub results: Vec<SearchResult>,
    pub images: Vec<ImageResult>,
}

/// Results per dependency when spreading `desired` results over `dependencies` steps that
/// found `total` results between them.
pub fn per_dependency(desired: usize, total: usize, dependencies: usize) -> usize {
    if dependencies == 0 {
        return 0;
    }
    (desired / dependencies).min(total / dependencies)
}

/// An even cross-section of the dependencies' results, deduplicated by url, plus the first
/// few images of each dependency.
pub fn select_evidence(
    state: &ResearchState,
    dependencies: &[u32],
    desired: usize,
    images_per_dependency: usize,
) -> Evidence {
    let total: usize = dependencies
        .iter()
        .map(|id| state.results_for(*id).len())
        .sum();
    let per_dep = per_dependency(desired, total, dependencies.len());

    let results = dedup_results(dependencies.iter().flat_map(|id| {
        let rs = state.results_for(*id);
        rs[..per_dep.min(rs.len())].iter().cloned()
    }));
    let images = dependencies
        .iter()
        .flat_map(|id| {
            let imgs = state.images_for(*id);
            imgs[..images_per_dependency.min(imgs.len())].iter().cloned()
        })
        .collect();

    debug!(
        dependencies = dependencies.len(),
        per_dependency = per_dep,
        "answer evidence selected"
    );
    Evidence { results, images }
}

/// Every dependency's note in step-id order, separator-delimited, capped at `budget`.
pub fn format_context_with_steps(
    state: &ResearchState,
    dependencies: &[u32],
    budget: usize,
) -> String {
    let ids: BTreeSet<u32> = dependencies.iter().copied().collect();
    let joined = ids
        .into_iter()
        .filter_map(|id| state.context(id))
        .map(|c| {
            format!(
                "Everything below is context for step: {}\nContext: {}\n{STEP_SEPARATOR}\n",
                c.step, c.context
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    truncate_chars(&joined, budget)
}

/// Stream the answer, one `TextChunk` per completion delta, and return the full text.
pub async fn stream_answer(
    llm: &dyn LanguageModel,
    query: &str,
    context: &str,
    sink: &EventSink,
) -> Result<String> {
    let prompt = prompts::fill(
        prompts::ANSWER_PROMPT,
        &[("context", context), ("query", query)],
    );
    let mut stream = llm.stream_complete(&prompt).await?;
    let mut answer = String::new();
    let mut chunks = 0usize;
    while let Some(delta) = stream.next().await {
        let text = delta?;
        answer.push_str(&text);
        chunks += 1;
        sink.emit(StreamEvent::TextChunk { text }).await;
    }
    debug!(chunks, chars = answer.len(), "answer streamed");
    Ok(answer)
}
