fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env(key).map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Knobs for one [`crate::AgentSearch`] instance.
///
/// Passed explicitly to the engine; nothing in the engine reads process env.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Multi-step search is available. When false, pro-search requests are rejected up front.
    pub pro_mode_enabled: bool,
    /// Model-name prefixes treated as resource-constrained local models.
    pub local_model_prefixes: Vec<String>,
    /// Character budget for one step's evidence note.
    pub step_context_chars: usize,
    /// Character budget for the merged answer context.
    pub answer_context_chars: usize,
    /// Upper bound on evidence results handed to the answer step.
    pub desired_result_count: usize,
    pub images_per_dependency: usize,
    pub max_queries_per_step: usize,
    pub related_question_count: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pro_mode_enabled: true,
            local_model_prefixes: vec!["ollama/".to_string()],
            step_context_chars: 7_000,
            answer_context_chars: 10_000,
            desired_result_count: 12,
            images_per_dependency: 2,
            max_queries_per_step: 3,
            related_question_count: 3,
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with `PROSEARCH_PRO_MODE` and `PROSEARCH_LOCAL_MODEL_PREFIXES`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.pro_mode_enabled = env_bool("PROSEARCH_PRO_MODE", cfg.pro_mode_enabled);
        if let Some(v) = env("PROSEARCH_LOCAL_MODEL_PREFIXES") {
            let prefixes: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !prefixes.is_empty() {
                cfg.local_model_prefixes = prefixes;
            }
        }
        cfg
    }

    pub fn is_local_model(&self, model: &str) -> bool {
        let model = model.trim().to_ascii_lowercase();
        self.local_model_prefixes
            .iter()
            .any(|p| model.starts_with(&p.to_ascii_lowercase()))
    }
}
