use crate::{ImageResult, SearchResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Existing thread to append to; `None` starts a new thread.
    #[serde(default)]
    pub thread_id: Option<u64>,
    #[serde(default)]
    pub model: String,
    pub query: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Multi-step agent search when true, single-shot search+answer otherwise.
    #[serde(default)]
    pub pro_search: bool,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            thread_id: None,
            model: String::new(),
            query: query.into(),
            history: Vec::new(),
            pro_search: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Done,
}

/// Execution record for one plan step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentSearchStep {
    pub step_number: u32,
    pub step: String,
    pub queries: Vec<String>,
    pub results: Vec<SearchResult>,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentSearchFullResponse {
    pub steps: Vec<String>,
    pub steps_details: Vec<AgentSearchStep>,
}

impl AgentSearchFullResponse {
    pub fn from_steps(steps_details: Vec<AgentSearchStep>) -> Self {
        Self {
            steps: steps_details.iter().map(|s| s.step.clone()).collect(),
            steps_details,
        }
    }
}

/// Everything a run hands to the turn store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub thread_id: Option<u64>,
    pub model: String,
    pub user_message: String,
    pub assistant_message: String,
    /// Present for multi-step runs only.
    pub agent_search: Option<AgentSearchFullResponse>,
    pub search_results: Vec<SearchResult>,
    pub image_results: Vec<ImageResult>,
    pub related_queries: Vec<String>,
}
