//! Multi-step agent search.
//!
//! A run plans a few dependency-linked research steps, searches for each one, and streams a
//! cited answer built from the accumulated evidence. Model output that should be JSON is
//! decoded through [`repair`], which always yields something usable; anything else that
//! fails sends the run down a single-shot search+answer path, so a started run always ends
//! with `StreamEnd` (or `Error` if even that path fails).
//!
//! ```no_run
//! # async fn demo(engine: prosearch_agent::AgentSearch) -> prosearch_core::Result<()> {
//! use futures::StreamExt;
//! use prosearch_core::ChatRequest;
//!
//! let mut events = engine.stream(ChatRequest::new("when is the next lunar eclipse?"))?;
//! while let Some(ev) = events.next().await {
//!     println!("{}", serde_json::to_string(&ev).unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod execute;
pub mod plan;
pub mod prompts;
pub mod related;
pub mod rephrase;
pub mod repair;
pub mod run;
pub mod sink;
pub mod synthesize;

pub use config::AgentConfig;
pub use execute::{interleave, ResearchState, StepContext, StepExecutor};
pub use plan::{PlanStep, QueryPlan, QueryPlanner, MAX_PLAN_STEPS};
pub use related::RelatedQuestions;
pub use rephrase::LlmRephraser;
pub use repair::{repair_plan, repair_queries, Repaired};
pub use run::AgentSearch;
pub use sink::{EventSink, EventStream};
pub use synthesize::{select_evidence, Evidence};
