use async_trait::async_trait;
use futures::{stream, StreamExt};
use prosearch_agent::{prompts, AgentConfig, AgentSearch};
use prosearch_core::{
    ChatRequest, Error, ImageResult, LanguageModel, Result, SearchProvider, SearchQuery,
    SearchResponse, SearchResult, StreamEvent, TextStream, TurnRecord, TurnStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted model: replies are picked by which prompt template the request came from.
#[derive(Default)]
struct ScriptedModel {
    plan: Option<&'static str>,
    queries: Option<&'static str>,
    related: Option<&'static str>,
    answer: Option<Vec<&'static str>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    fn kind(prompt: &str) -> &'static str {
        if prompt.contains("research plan") {
            "plan"
        } else if prompt.contains("web search queries") {
            "queries"
        } else if prompt.contains("follow-up questions") {
            "related"
        } else {
            "other"
        }
    }

    fn log(&self, kind: &str, prompt: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((kind.to_string(), prompt.to_string()));
    }

    fn calls_of(&self, kind: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn call_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let kind = Self::kind(prompt);
        self.log(kind, prompt);
        let reply = match kind {
            "plan" => self.plan,
            "queries" => self.queries,
            "related" => self.related,
            _ => None,
        };
        reply
            .map(str::to_string)
            .ok_or_else(|| Error::Llm(format!("no scripted reply for {kind}")))
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        self.log("answer", prompt);
        match &self.answer {
            Some(chunks) => {
                let items: Vec<Result<String>> =
                    chunks.iter().map(|c| Ok(c.to_string())).collect();
                Ok(stream::iter(items).boxed())
            }
            None => Err(Error::Llm("model unavailable".to_string())),
        }
    }
}

#[derive(Default)]
struct FakeSearch {
    fail: bool,
    empty: bool,
    queries: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        self.queries.lock().unwrap().push(q.query.clone());
        if self.fail {
            return Err(Error::Search("provider unreachable".to_string()));
        }
        if self.empty {
            return Ok(SearchResponse::default());
        }
        let slug = q.query.replace(' ', "-");
        Ok(SearchResponse {
            results: (0..3)
                .map(|i| SearchResult {
                    title: format!("{} #{i}", q.query),
                    url: format!("https://example.com/{slug}/{i}"),
                    content: format!("snippet {i} for {}", q.query),
                })
                .collect(),
            images: vec![ImageResult::from(format!("https://img.example.com/{slug}.png"))],
            provider: "fake".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<TurnRecord>>,
    fail_first: bool,
    attempts: Mutex<usize>,
}

#[async_trait]
impl TurnStore for RecordingStore {
    async fn save(&self, turn: TurnRecord) -> Result<u64> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.fail_first && attempt == 1 {
            return Err(Error::Store("disk full".to_string()));
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(turn);
        Ok(41 + saved.len() as u64)
    }
}

struct Harness {
    llm: Arc<ScriptedModel>,
    search: Arc<FakeSearch>,
    store: Arc<RecordingStore>,
    engine: AgentSearch,
}

fn harness(llm: ScriptedModel, search: FakeSearch, config: AgentConfig) -> Harness {
    harness_with_store(llm, search, RecordingStore::default(), config)
}

fn harness_with_store(
    llm: ScriptedModel,
    search: FakeSearch,
    store: RecordingStore,
    config: AgentConfig,
) -> Harness {
    let llm = Arc::new(llm);
    let search = Arc::new(search);
    let store = Arc::new(store);
    let engine = AgentSearch::new(llm.clone(), search.clone(), store.clone(), config);
    Harness {
        llm,
        search,
        store,
        engine,
    }
}

async fn collect(engine: &AgentSearch, request: ChatRequest) -> Vec<StreamEvent> {
    let events = engine.stream(request).expect("preconditions hold");
    tokio::time::timeout(Duration::from_secs(5), events.collect::<Vec<_>>())
        .await
        .expect("run finishes")
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = events.iter().map(StreamEvent::kind).collect();
    // Chunk count depends on the script; collapse runs for ordering checks.
    out.dedup();
    out
}

const MULTILINE_PLAN: &str = "{\"steps\": [\n  {\"id\": 0, \"step\": \"Research upcoming lunar eclipses\", \"dependencies\": []},\n  {\"id\": 1, \"step\": \"Summarize the dates\", \"dependencies\": [\n    0\n  ]}\n]}";

fn healthy_model() -> ScriptedModel {
    ScriptedModel {
        plan: Some(MULTILINE_PLAN),
        queries: Some(r#"{"search_queries": ["lunar eclipse 2025", "next total lunar eclipse"]}"#),
        related: Some(r#"{"related_questions": ["Where is it visible?", "How long does it last?", "Is it safe to watch?"]}"#),
        answer: Some(vec!["The next ", "eclipse is ", "in March [1]."]),
        ..Default::default()
    }
}

#[tokio::test]
async fn malformed_plan_is_repaired_and_the_run_completes() {
    let h = harness(healthy_model(), FakeSearch::default(), AgentConfig::default());
    let events = collect(&h.engine, ChatRequest::new("next lunar eclipse")).await;

    assert_eq!(
        kinds(&events),
        vec![
            "agent-query-plan",
            "agent-search-queries",
            "agent-read-results",
            "agent-finish",
            "begin-stream",
            "search-results",
            "text-chunk",
            "related-queries",
            "final-response",
            "stream-end",
        ]
    );
    assert_eq!(
        events[0],
        StreamEvent::AgentQueryPlan {
            steps: vec![
                "Research upcoming lunar eclipses".to_string(),
                "Summarize the dates".to_string()
            ]
        }
    );
    assert_eq!(events.last(), Some(&StreamEvent::StreamEnd { thread_id: 42 }));

    // Two queries, three results each, interleaved by rank.
    let StreamEvent::AgentReadResults { results, step_number } = &events[2] else {
        panic!("expected read results, got {:?}", events[2]);
    };
    assert_eq!(*step_number, 0);
    assert_eq!(results.len(), 6);
    assert_eq!(results[0].title, "lunar eclipse 2025 #0");
    assert_eq!(results[1].title, "next total lunar eclipse #0");

    let StreamEvent::SearchResults { results, images } = &events[5] else {
        panic!("expected search results, got {:?}", events[5]);
    };
    assert_eq!(results.len(), 6);
    assert_eq!(images.len(), 2);

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextChunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "The next eclipse is in March [1].");

    let saved = h.store.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    let turn = &saved[0];
    assert_eq!(turn.user_message, "next lunar eclipse");
    assert_eq!(turn.assistant_message, text);
    assert_eq!(turn.related_queries.len(), 3);
    let agent = turn.agent_search.as_ref().expect("multi-step transcript");
    assert_eq!(agent.steps.len(), 2);
    assert_eq!(agent.steps_details[0].queries.len(), 2);
    assert!(agent.steps_details[1].queries.is_empty());
}

#[tokio::test]
async fn empty_search_results_leave_an_empty_context_for_dependents() {
    let llm = ScriptedModel {
        plan: Some(
            r#"{"steps": [
                {"id": 0, "step": "Find primary sources", "dependencies": []},
                {"id": 1, "step": "Cross-check the sources", "dependencies": [0]},
                {"id": 2, "step": "Answer", "dependencies": [0, 1]}
            ]}"#,
        ),
        queries: Some(r#"["only query"]"#),
        related: Some(r#"["follow up"]"#),
        answer: Some(vec!["Nothing was found."]),
        ..Default::default()
    };
    let search = FakeSearch {
        empty: true,
        ..Default::default()
    };
    let h = harness(llm, search, AgentConfig::default());
    let events = collect(&h.engine, ChatRequest::new("obscure topic")).await;

    let read: Vec<(u32, usize)> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::AgentReadResults {
                results,
                step_number,
            } => Some((*step_number, results.len())),
            _ => None,
        })
        .collect();
    assert_eq!(read, vec![(0, 0), (1, 0)]);

    // Step 1 saw step 0's (empty) note.
    let query_prompts = h.llm.calls_of("queries");
    assert_eq!(query_prompts.len(), 2);
    assert!(query_prompts[1].contains("Step: Find primary sources\nContext: \n"));

    assert!(events.contains(&StreamEvent::SearchResults {
        results: vec![],
        images: vec![],
    }));
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd { .. })));
}

#[tokio::test]
async fn failing_collaborators_fall_back_to_single_shot() {
    let llm = ScriptedModel {
        answer: Some(vec!["I could not find sources."]),
        ..Default::default()
    };
    let search = FakeSearch {
        fail: true,
        ..Default::default()
    };
    let h = harness(llm, search, AgentConfig::default());
    let events = collect(&h.engine, ChatRequest::new("anything")).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::BeginStream {
                query: "anything".to_string()
            },
            StreamEvent::SearchResults {
                results: vec![],
                images: vec![],
            },
            StreamEvent::TextChunk {
                text: "I could not find sources.".to_string()
            },
            StreamEvent::RelatedQueries {
                related_queries: vec![]
            },
            StreamEvent::FinalResponse {
                message: "I could not find sources.".to_string()
            },
            StreamEvent::StreamEnd { thread_id: 42 },
        ]
    );

    // Single search on the raw query; the answer prompt carries an empty context.
    assert_eq!(*h.search.queries.lock().unwrap(), vec!["anything".to_string()]);
    assert!(h.llm.calls_of("answer")[0].contains("<context>\n\n</context>"));

    let saved = h.store.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].agent_search.is_none());
}

#[tokio::test]
async fn out_of_order_plan_is_rejected_and_falls_back() {
    let llm = ScriptedModel {
        plan: Some(
            r#"{"steps": [
                {"id": 0, "step": "Compare", "dependencies": [1]},
                {"id": 1, "step": "Gather", "dependencies": [0]}
            ]}"#,
        ),
        answer: Some(vec!["ok"]),
        ..Default::default()
    };
    let h = harness(llm, FakeSearch::default(), AgentConfig::default());
    let events = collect(&h.engine, ChatRequest::new("compare things")).await;

    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::AgentQueryPlan { .. })));
    assert_eq!(events[0].kind(), "begin-stream");
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd { .. })));
    assert_eq!(h.store.saved.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fallback_failure_ends_with_an_error_event() {
    let llm = ScriptedModel::default();
    let h = harness(llm, FakeSearch::default(), AgentConfig::default());
    let events = collect(&h.engine, ChatRequest::new("anything")).await;

    let last = events.last().expect("events");
    assert!(last.is_terminal());
    assert!(matches!(last, StreamEvent::Error { detail } if detail.contains("model unavailable")));
    assert!(h.store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_save_ends_the_run_without_a_second_answer() {
    let store = RecordingStore {
        fail_first: true,
        ..Default::default()
    };
    let h = harness_with_store(
        healthy_model(),
        FakeSearch::default(),
        store,
        AgentConfig::default(),
    );
    let events = collect(&h.engine, ChatRequest::new("next lunar eclipse")).await;

    let count = |kind: &str| events.iter().filter(|e| e.kind() == kind).count();
    assert_eq!(count("begin-stream"), 1);
    assert_eq!(count("final-response"), 1);
    assert_eq!(count("stream-end"), 0);
    assert!(matches!(events.last(), Some(StreamEvent::Error { detail }) if detail.contains("disk full")));
    assert_eq!(*h.store.attempts.lock().unwrap(), 1);
    assert!(h.store.saved.lock().unwrap().is_empty());
    assert_eq!(h.llm.calls_of("answer").len(), 1);
}

#[tokio::test]
async fn preconditions_fail_before_any_event() {
    let config = AgentConfig {
        pro_mode_enabled: false,
        ..AgentConfig::default()
    };
    let h = harness(healthy_model(), FakeSearch::default(), config);

    let err = h.engine.stream(ChatRequest::new("q")).unwrap_err();
    assert!(matches!(err, Error::Disabled(_)));

    let err = h.engine.stream(ChatRequest::new("   ")).unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    assert!(h.llm.call_order().is_empty());
    assert!(h.store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn quick_requests_skip_planning() {
    let config = AgentConfig {
        pro_mode_enabled: false,
        ..AgentConfig::default()
    };
    let h = harness(healthy_model(), FakeSearch::default(), config);
    let mut request = ChatRequest::new("lunar eclipse");
    request.pro_search = false;
    let events = collect(&h.engine, request).await;

    assert_eq!(
        kinds(&events),
        vec![
            "begin-stream",
            "search-results",
            "text-chunk",
            "related-queries",
            "final-response",
            "stream-end",
        ]
    );
    assert!(h.llm.calls_of("plan").is_empty());
}

#[tokio::test]
async fn local_models_get_json_hints_and_deferred_related_questions() {
    let h = harness(healthy_model(), FakeSearch::default(), AgentConfig::default());
    let mut request = ChatRequest::new("next lunar eclipse");
    request.model = "ollama/llama3.1".to_string();
    let events = collect(&h.engine, request).await;
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd { .. })));

    assert!(h.llm.calls_of("plan")[0].ends_with(prompts::LOCAL_JSON_SUFFIX));
    let order = h.llm.call_order();
    let answer_at = order.iter().position(|k| k == "answer").unwrap();
    let related_at = order.iter().position(|k| k == "related").unwrap();
    assert!(answer_at < related_at);
}

#[tokio::test]
async fn dropped_reader_does_not_cancel_the_run() {
    let h = harness(healthy_model(), FakeSearch::default(), AgentConfig::default());
    let events = h.engine.stream(ChatRequest::new("next lunar eclipse")).unwrap();
    drop(events);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.store.saved.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "run never saved");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.store.saved.lock().unwrap()[0].agent_search.is_some());
}

#[tokio::test]
async fn events_round_trip_through_the_wire_format() {
    let h = harness(healthy_model(), FakeSearch::default(), AgentConfig::default());
    let events = collect(&h.engine, ChatRequest::new("next lunar eclipse")).await;
    for ev in &events {
        let line = serde_json::to_string(ev).unwrap();
        assert_eq!(StreamEvent::from_json_lenient(&line).unwrap().as_ref(), Some(ev));
    }
}
