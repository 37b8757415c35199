//! Streaming event protocol.
//!
//! One run produces one ordered stream of events. On the wire each event is
//! `{"event": "<kind>", "data": {...}}`. The protocol is append-only: readers
//! must skip kinds they do not know, which is what [`StreamEvent::from_json_lenient`] does.

use crate::{Error, ImageResult, Result, SearchResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    AgentQueryPlan {
        steps: Vec<String>,
    },
    AgentSearchQueries {
        queries: Vec<String>,
        step_number: u32,
    },
    AgentReadResults {
        results: Vec<SearchResult>,
        step_number: u32,
    },
    AgentFinish {},
    BeginStream {
        query: String,
    },
    SearchResults {
        results: Vec<SearchResult>,
        images: Vec<ImageResult>,
    },
    TextChunk {
        text: String,
    },
    RelatedQueries {
        related_queries: Vec<String>,
    },
    FinalResponse {
        message: String,
    },
    StreamEnd {
        thread_id: u64,
    },
    /// Terminal failure: the run could not complete even through the single-shot fallback.
    Error {
        detail: String,
    },
}

impl StreamEvent {
    pub const KINDS: [&'static str; 11] = [
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
        "error",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::AgentQueryPlan { .. } => "agent-query-plan",
            StreamEvent::AgentSearchQueries { .. } => "agent-search-queries",
            StreamEvent::AgentReadResults { .. } => "agent-read-results",
            StreamEvent::AgentFinish {} => "agent-finish",
            StreamEvent::BeginStream { .. } => "begin-stream",
            StreamEvent::SearchResults { .. } => "search-results",
            StreamEvent::TextChunk { .. } => "text-chunk",
            StreamEvent::RelatedQueries { .. } => "related-queries",
            StreamEvent::FinalResponse { .. } => "final-response",
            StreamEvent::StreamEnd { .. } => "stream-end",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// True for the events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::StreamEnd { .. } | StreamEvent::Error { .. })
    }

    /// Parse one wire event, returning `Ok(None)` for event kinds this version does not know.
    pub fn from_json_lenient(raw: &str) -> Result<Option<StreamEvent>> {
        let v: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| Error::Decode(e.to_string()))?;
        let Some(kind) = v.get("event").and_then(|k| k.as_str()) else {
            return Err(Error::Decode("event record has no `event` tag".to_string()));
        };
        if !Self::KINDS.contains(&kind) {
            return Ok(None);
        }
        serde_json::from_value(v)
            .map(Some)
            .map_err(|e| Error::Decode(e.to_string()))
    }
}
