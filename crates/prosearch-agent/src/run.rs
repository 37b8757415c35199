//! Run supervision: preconditions, the multi-step path, and the single-shot fallback.

use crate::config::AgentConfig;
use crate::execute::{build_context, ranked_results_from_queries, ResearchState, StepExecutor};
use crate::plan::QueryPlanner;
use crate::related::RelatedQuestions;
use crate::rephrase::LlmRephraser;
use crate::sink::{EventSink, EventStream};
use crate::synthesize::{format_context_with_steps, select_evidence, stream_answer};
use prosearch_core::{
    AgentSearchFullResponse, ChatRequest, Error, LanguageModel, PlanError, QueryRephraser, Result,
    SearchProvider, StreamEvent, TurnRecord, TurnStore,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Events buffered between a run and a slow reader before the run waits.
pub const EVENT_BUFFER: usize = 64;

/// The agent search engine. Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct AgentSearch {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    store: Arc<dyn TurnStore>,
    rephraser: Arc<dyn QueryRephraser>,
    config: Arc<AgentConfig>,
}

impl AgentSearch {
    /// Follow-ups are rephrased with the same model unless [`Self::with_rephraser`] is used.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        store: Arc<dyn TurnStore>,
        config: AgentConfig,
    ) -> Self {
        let rephraser = Arc::new(LlmRephraser::new(llm.clone()));
        Self {
            llm,
            search,
            store,
            rephraser,
            config: Arc::new(config),
        }
    }

    pub fn with_rephraser(mut self, rephraser: Arc<dyn QueryRephraser>) -> Self {
        self.rephraser = rephraser;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Checks that must pass before any event is produced.
    pub fn check(&self, request: &ChatRequest) -> Result<()> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".to_string()));
        }
        if request.pro_search && !self.config.pro_mode_enabled {
            return Err(Error::Disabled(
                "pro search is not enabled on this deployment".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate `request`, then run it on the tokio runtime and return its events.
    ///
    /// Once this returns `Ok`, the stream always ends with `StreamEnd` or `Error`.
    /// Dropping the stream does not stop the run.
    pub fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        self.check(&request)?;
        let (sink, events) = EventSink::channel(EVENT_BUFFER);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(request, &sink).await;
        });
        Ok(events)
    }

    /// Run to completion, emitting into `sink`. Preconditions are not checked here.
    ///
    /// The turn is persisted once, after whichever path produced the answer. A failed save
    /// ends the run with an `Error` event rather than a second attempt.
    pub async fn run(&self, request: ChatRequest, sink: &EventSink) {
        let local = self.config.is_local_model(&request.model);
        let query = self.rephrase(&request).await;

        let answered = if request.pro_search {
            match self.agentic(&request, &query, local, sink).await {
                Ok(turn) => Ok(turn),
                Err(e) => {
                    warn!(error = %e, "agent search failed; falling back to single-shot search");
                    self.single_shot(&request, &query, local, sink).await
                }
            }
        } else {
            self.single_shot(&request, &query, local, sink).await
        };

        let outcome = match answered {
            Ok(turn) => self.store.save(turn).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(thread_id) => {
                info!(thread_id, "search complete");
                sink.emit(StreamEvent::StreamEnd { thread_id }).await;
            }
            Err(e) => {
                warn!(error = %e, "search failed");
                sink.emit(StreamEvent::Error {
                    detail: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn rephrase(&self, request: &ChatRequest) -> String {
        match self
            .rephraser
            .rephrase(&request.query, &request.history)
            .await
        {
            Ok(q) if !q.trim().is_empty() => q,
            Ok(_) => request.query.clone(),
            Err(e) => {
                warn!(error = %e, "query rephrase failed; using the query as given");
                request.query.clone()
            }
        }
    }

    fn related(&self, local: bool) -> RelatedQuestions {
        RelatedQuestions::new(
            self.llm.clone(),
            self.config.related_question_count,
            self.config.answer_context_chars,
            local,
        )
    }

    async fn agentic(
        &self,
        request: &ChatRequest,
        query: &str,
        local: bool,
        sink: &EventSink,
    ) -> Result<TurnRecord> {
        let cfg = &self.config;
        let plan = QueryPlanner::new(self.llm.clone(), local).plan(query).await?;
        sink.emit(StreamEvent::AgentQueryPlan {
            steps: plan.step_texts(),
        })
        .await;

        let (terminal, research) = plan.steps.split_last().ok_or(PlanError::Empty)?;
        let executor = StepExecutor::new(self.llm.clone(), self.search.clone(), cfg, local);
        let mut state = ResearchState::default();

        for step in research {
            let queries = {
                let deps = state.contexts_for(&step.dependencies);
                executor.search_queries(query, step, &deps).await
            };
            sink.emit(StreamEvent::AgentSearchQueries {
                queries: queries.clone(),
                step_number: step.id,
            })
            .await;

            let (results, images) = executor.search(&queries).await?;
            sink.emit(StreamEvent::AgentReadResults {
                results: results.clone(),
                step_number: step.id,
            })
            .await;

            let ctx = state.record(step, queries, results, images, cfg.step_context_chars);
            debug!(step = step.id, context_chars = ctx.context.len(), "step recorded");
        }

        sink.emit(StreamEvent::AgentFinish {}).await;
        sink.emit(StreamEvent::BeginStream {
            query: query.to_string(),
        })
        .await;

        let evidence = select_evidence(
            &state,
            &terminal.dependencies,
            cfg.desired_result_count,
            cfg.images_per_dependency,
        );
        let related = self.related(local).start(query, &evidence.results);
        sink.emit(StreamEvent::SearchResults {
            results: evidence.results.clone(),
            images: evidence.images.clone(),
        })
        .await;

        let context =
            format_context_with_steps(&state, &terminal.dependencies, cfg.answer_context_chars);
        let answer = stream_answer(self.llm.as_ref(), query, &context, sink).await?;

        let related_queries = related.finish().await;
        sink.emit(StreamEvent::RelatedQueries {
            related_queries: related_queries.clone(),
        })
        .await;
        sink.emit(StreamEvent::FinalResponse {
            message: answer.clone(),
        })
        .await;

        state.record_terminal(terminal);
        Ok(TurnRecord {
            thread_id: request.thread_id,
            model: request.model.clone(),
            user_message: request.query.clone(),
            assistant_message: answer,
            agent_search: Some(AgentSearchFullResponse::from_steps(state.into_steps())),
            search_results: evidence.results,
            image_results: evidence.images,
            related_queries,
        })
    }

    /// One search on the query, one answer over its results.
    async fn single_shot(
        &self,
        request: &ChatRequest,
        query: &str,
        local: bool,
        sink: &EventSink,
    ) -> Result<TurnRecord> {
        sink.emit(StreamEvent::BeginStream {
            query: query.to_string(),
        })
        .await;

        let (results, images) =
            match ranked_results_from_queries(self.search.as_ref(), &[query.to_string()]).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "search failed; answering without results");
                    (Vec::new(), Vec::new())
                }
            };
        let related = self.related(local).start(query, &results);
        sink.emit(StreamEvent::SearchResults {
            results: results.clone(),
            images: images.clone(),
        })
        .await;

        let context = build_context(&results, self.config.step_context_chars);
        let answer = stream_answer(self.llm.as_ref(), query, &context, sink).await?;

        let related_queries = related.finish().await;
        sink.emit(StreamEvent::RelatedQueries {
            related_queries: related_queries.clone(),
        })
        .await;
        sink.emit(StreamEvent::FinalResponse {
            message: answer.clone(),
        })
        .await;

        Ok(TurnRecord {
            thread_id: request.thread_id,
            model: request.model.clone(),
            user_message: request.query.clone(),
            assistant_message: answer,
            agent_search: None,
            search_results: results,
            image_results: images,
            related_queries,
        })
    }
}
