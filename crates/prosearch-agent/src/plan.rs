use crate::prompts;
use crate::repair;
use prosearch_core::{LanguageModel, PlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// A plan has between 1 and this many steps.
pub const MAX_PLAN_STEPS: usize = 5;

pub(crate) const RESEARCH_STEP: &str = "Research information about the query";
pub(crate) const SUMMARIZE_STEP: &str = "Summarize findings to answer the query";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStep {
    pub id: u32,
    pub step: String,
    /// Ids of earlier steps whose findings this step reads.
    pub dependencies: Vec<u32>,
}

/// Ordered, dependency-linked research steps. The last step is terminal: it is not
/// searched, it synthesizes the answer from its dependencies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryPlan {
    pub steps: Vec<PlanStep>,
}

impl QueryPlan {
    /// Research, then summarize.
    pub fn generic() -> Self {
        Self {
            steps: vec![
                PlanStep {
                    id: 0,
                    step: RESEARCH_STEP.to_string(),
                    dependencies: vec![],
                },
                PlanStep {
                    id: 1,
                    step: SUMMARIZE_STEP.to_string(),
                    dependencies: vec![0],
                },
            ],
        }
    }

    pub fn terminal(&self) -> Option<&PlanStep> {
        self.steps.last()
    }

    pub fn step_texts(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.step.clone()).collect()
    }

    /// Check the plan invariants, including that every dependency is declared earlier.
    pub fn validate(&self) -> std::result::Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(PlanError::TooManySteps {
                count: self.steps.len(),
                max: MAX_PLAN_STEPS,
            });
        }
        let all: HashSet<u32> = self.steps.iter().map(|s| s.id).collect();
        let mut declared: HashSet<u32> = HashSet::new();
        for step in &self.steps {
            if declared.contains(&step.id) {
                return Err(PlanError::DuplicateId(step.id));
            }
            for &dep in &step.dependencies {
                if !all.contains(&dep) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id,
                        dependency: dep,
                    });
                }
                if !declared.contains(&dep) {
                    return Err(PlanError::OutOfOrder {
                        step: step.id,
                        dependency: dep,
                    });
                }
            }
            declared.insert(step.id);
        }
        if let Some(terminal) = self.terminal() {
            if terminal.dependencies.is_empty() {
                return Err(PlanError::TerminalWithoutDependencies { step: terminal.id });
            }
        }
        Ok(())
    }

    /// Make recovered steps structurally sound.
    ///
    /// Drops duplicate ids, self references and dangling dependencies, and caps the step
    /// count. A terminal step without dependencies means no synthesis step was planned, so
    /// one is appended that depends on every remaining step. Forward references survive so
    /// that [`QueryPlan::validate`] can reject them.
    pub fn normalized(steps: Vec<PlanStep>) -> Self {
        let mut seen = HashSet::new();
        let mut steps: Vec<PlanStep> = steps.into_iter().filter(|s| seen.insert(s.id)).collect();
        if steps.is_empty() {
            return Self::generic();
        }
        steps.truncate(MAX_PLAN_STEPS);
        retain_known_dependencies(&mut steps);

        let anchored = steps
            .last()
            .is_some_and(|terminal| !terminal.dependencies.is_empty());
        if !anchored {
            steps.truncate(MAX_PLAN_STEPS - 1);
            retain_known_dependencies(&mut steps);
            let next_id = steps
                .iter()
                .map(|s| s.id)
                .max()
                .map_or(0, |m| m.saturating_add(1));
            let dependencies = steps.iter().map(|s| s.id).collect();
            steps.push(PlanStep {
                id: next_id,
                step: SUMMARIZE_STEP.to_string(),
                dependencies,
            });
        }
        Self { steps }
    }
}

fn retain_known_dependencies(steps: &mut [PlanStep]) {
    let ids: HashSet<u32> = steps.iter().map(|s| s.id).collect();
    for step in steps.iter_mut() {
        let own = step.id;
        let mut kept = HashSet::new();
        step.dependencies
            .retain(|d| *d != own && ids.contains(d) && kept.insert(*d));
    }
}

/// Asks the model to decompose a query into a step plan.
pub struct QueryPlanner {
    llm: Arc<dyn LanguageModel>,
    local_model: bool,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn LanguageModel>, local_model: bool) -> Self {
        Self { llm, local_model }
    }

    /// No retries here: malformed output is handled by the repair chain, and a plan that
    /// still fails validation is returned as `Error::InvalidPlan`.
    pub async fn plan(&self, query: &str) -> Result<QueryPlan> {
        let prompt = prompts::fill(prompts::QUERY_PLAN_PROMPT, &[("query", query)]);
        let raw = self
            .llm
            .complete_json(&prompts::for_model(&prompt, self.local_model))
            .await?;
        let repaired = repair::repair_plan(&raw);
        repaired.value.validate()?;
        info!(
            steps = repaired.value.steps.len(),
            strategy = repaired.strategy,
            "query plan ready"
        );
        Ok(repaired.value)
    }
}
