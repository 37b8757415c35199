//! Public facade crate for `prosearch`.
//!
//! This crate contains no IO or provider-specific logic. It re-exports the data model,
//! event protocol and collaborator traits from `prosearch-core`, and the engine from
//! `prosearch-agent`. Concrete HTTP and filesystem collaborators live in `prosearch-local`.

pub use prosearch_core::*;

pub use prosearch_agent as agent;
pub use prosearch_agent::{AgentConfig, AgentSearch, EventStream, LlmRephraser};
