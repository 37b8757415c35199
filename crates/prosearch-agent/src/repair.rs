//! Best-effort decoding of model output into typed values.
//!
//! Each shape has an ordered list of [`RepairStrategy`] values. A strategy is a pure function
//! from raw text to an optional value; [`first_success`] runs them in order and tags the
//! result with the strategy that produced it. Cheap, faithful decodes come first and
//! increasingly lossy reconstructions come last.
//!
//! Step plans always come out with something: when no strategy recovers a structure the
//! generic research/summarize plan is used. Query lists may come out empty; callers
//! substitute a synthetic query.

use crate::plan::{PlanStep, QueryPlan, MAX_PLAN_STEPS};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, trace, warn};

pub struct RepairStrategy<T> {
    pub name: &'static str,
    /// True for tiers that reconstruct rather than decode.
    pub degraded: bool,
    pub run: fn(&str) -> Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaired<T> {
    pub value: T,
    pub strategy: &'static str,
    pub degraded: bool,
}

pub fn first_success<T>(raw: &str, strategies: &[RepairStrategy<T>]) -> Option<Repaired<T>> {
    for s in strategies {
        match (s.run)(raw) {
            Some(value) => {
                if s.degraded {
                    warn!(strategy = s.name, "structured output recovered by reconstruction");
                } else {
                    debug!(strategy = s.name, "structured output decoded");
                }
                return Some(Repaired {
                    value,
                    strategy: s.name,
                    degraded: s.degraded,
                });
            }
            None => trace!(strategy = s.name, "repair strategy rejected input"),
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Step plans

const PLAN_STRATEGIES: &[RepairStrategy<Vec<PlanStep>>] = &[
    RepairStrategy {
        name: "direct",
        degraded: false,
        run: plan_direct,
    },
    RepairStrategy {
        name: "fenced",
        degraded: false,
        run: plan_fenced,
    },
    RepairStrategy {
        name: "normalized",
        degraded: false,
        run: plan_normalized,
    },
    RepairStrategy {
        name: "backfilled",
        degraded: false,
        run: plan_backfilled,
    },
    RepairStrategy {
        name: "fragments",
        degraded: true,
        run: plan_fragments,
    },
    RepairStrategy {
        name: "step_texts",
        degraded: true,
        run: plan_step_texts,
    },
    RepairStrategy {
        name: "keywords",
        degraded: true,
        run: plan_keywords,
    },
];

/// Decode a step plan from model output. Never fails.
///
/// The returned plan has at least two steps, unique ids and no dangling dependencies. It
/// is not guaranteed to pass [`QueryPlan::validate`]: forward references are kept.
pub fn repair_plan(raw: &str) -> Repaired<QueryPlan> {
    match first_success(raw, PLAN_STRATEGIES) {
        Some(r) => Repaired {
            value: QueryPlan::normalized(r.value),
            strategy: r.strategy,
            degraded: r.degraded,
        },
        None => {
            warn!(
                raw_len = raw.len(),
                "no plan structure recovered; using the generic plan"
            );
            Repaired {
                value: QueryPlan::generic(),
                strategy: "generic",
                degraded: true,
            }
        }
    }
}

fn plan_direct(raw: &str) -> Option<Vec<PlanStep>> {
    let plan: QueryPlan = serde_json::from_str(raw.trim()).ok()?;
    (1..=MAX_PLAN_STEPS)
        .contains(&plan.steps.len())
        .then_some(plan.steps)
}

fn plan_fenced(raw: &str) -> Option<Vec<PlanStep>> {
    plan_direct(&strip_code_fences(raw)?)
}

fn plan_normalized(raw: &str) -> Option<Vec<PlanStep>> {
    let v: Value = serde_json::from_str(&normalize_json_text(raw)).ok()?;
    steps_from_value(&v, false)
}

fn plan_backfilled(raw: &str) -> Option<Vec<PlanStep>> {
    let v: Value = serde_json::from_str(&normalize_json_text(raw)).ok()?;
    steps_from_value(&v, true)
}

static STEP_FRAGMENT_STRICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)\{\s*"id"\s*:\s*(\d+)\s*,\s*"step"\s*:\s*"([^"]+)"\s*,\s*"dependencies"\s*:\s*(\[[^\]]*\])"#,
    )
    .expect("valid regex")
});

static STEP_FRAGMENT_LOOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)"id"\s*:\s*(\d+).*?"step"\s*:\s*"([^"]+)".*?"dependencies"\s*:\s*(\[[^\]]*\]|null)"#,
    )
    .expect("valid regex")
});

static STEP_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""step"\s*:\s*"([^"]+)""#).expect("valid regex"));

static STEP_KEYWORD_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)"([^"]*\b(?:search|research|find|look|investigate)\w*\b[^"]*)"(\s*:)?"#,
    )
    .expect("valid regex")
});

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

fn plan_fragments(raw: &str) -> Option<Vec<PlanStep>> {
    let text = strip_code_fences(raw).unwrap_or_else(|| raw.to_string());
    let strict = fragments_with(&STEP_FRAGMENT_STRICT, &text);
    let steps = if strict.is_empty() {
        fragments_with(&STEP_FRAGMENT_LOOSE, &text)
    } else {
        strict
    };
    (!steps.is_empty()).then_some(steps)
}

fn fragments_with(re: &Regex, text: &str) -> Vec<PlanStep> {
    re.captures_iter(text)
        .filter_map(|c| {
            let id = c.get(1)?.as_str().parse::<u32>().ok()?;
            let step = c.get(2)?.as_str().trim().to_string();
            if step.is_empty() {
                return None;
            }
            // Unparseable dependency lists degrade to none.
            let dependencies = c
                .get(3)
                .map(|m| {
                    DIGITS
                        .find_iter(m.as_str())
                        .filter_map(|d| d.as_str().parse::<u32>().ok())
                        .collect()
                })
                .unwrap_or_default();
            Some(PlanStep {
                id,
                step,
                dependencies,
            })
        })
        .collect()
}

fn plan_step_texts(raw: &str) -> Option<Vec<PlanStep>> {
    let steps: Vec<PlanStep> = STEP_TEXT
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, step)| {
            let id = i as u32;
            PlanStep {
                id,
                step,
                dependencies: if id == 0 { vec![] } else { vec![id - 1] },
            }
        })
        .collect();
    (!steps.is_empty()).then_some(steps)
}

fn plan_keywords(raw: &str) -> Option<Vec<PlanStep>> {
    let mut seen = HashSet::new();
    let steps: Vec<PlanStep> = STEP_KEYWORD_STRING
        .captures_iter(raw)
        // A trailing colon marks an object key, not a step.
        .filter(|c| c.get(2).is_none())
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|s| s.contains(char::is_whitespace) && seen.insert(s.clone()))
        .take(3)
        .enumerate()
        .map(|(i, step)| PlanStep {
            id: i as u32,
            step,
            dependencies: vec![],
        })
        .collect();
    (!steps.is_empty()).then_some(steps)
}

fn steps_from_value(v: &Value, backfill: bool) -> Option<Vec<PlanStep>> {
    let items: Vec<&Value> = match v {
        Value::Object(map) => match map.get("steps") {
            Some(Value::Array(a)) => a.iter().collect(),
            Some(_) => return None,
            None if looks_like_step(map) => vec![v],
            None => return None,
        },
        Value::Array(a) => a.iter().collect(),
        _ => return None,
    };

    let mut steps = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let parsed = item
            .as_object()
            .and_then(|obj| step_from_object(obj, idx, backfill));
        match parsed {
            Some(step) => steps.push(step),
            None if backfill => continue,
            None => return None,
        }
    }
    (!steps.is_empty()).then_some(steps)
}

fn looks_like_step(map: &serde_json::Map<String, Value>) -> bool {
    ["id", "step", "text", "description"]
        .iter()
        .any(|k| map.contains_key(*k))
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn step_from_object(
    obj: &serde_json::Map<String, Value>,
    idx: usize,
    backfill: bool,
) -> Option<PlanStep> {
    let id = match obj.get("id").and_then(as_u32) {
        Some(id) => id,
        None if backfill => obj
            .get("step_number")
            .and_then(as_u32)
            .unwrap_or(u32::try_from(idx).ok()?),
        None => return None,
    };

    let text = match obj.get("step").and_then(Value::as_str) {
        Some(t) => t,
        None if backfill => ["text", "description"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?,
        None => return None,
    };
    let step = text.trim().to_string();
    if step.is_empty() {
        return None;
    }

    let dependencies = match obj.get("dependencies") {
        Some(Value::Array(a)) => match a.iter().map(as_u32).collect::<Option<Vec<u32>>>() {
            Some(deps) => deps,
            None if backfill => a.iter().filter_map(as_u32).collect(),
            None => return None,
        },
        Some(Value::Null) | None if backfill => Vec::new(),
        Some(other) if backfill => as_u32(other).into_iter().collect(),
        _ => return None,
    };

    Some(PlanStep {
        id,
        step,
        dependencies,
    })
}

// ---------------------------------------------------------------------------
// Query lists

const QUERY_STRATEGIES: &[RepairStrategy<Vec<String>>] = &[
    RepairStrategy {
        name: "direct",
        degraded: false,
        run: queries_direct,
    },
    RepairStrategy {
        name: "fenced",
        degraded: false,
        run: queries_fenced,
    },
    RepairStrategy {
        name: "bare_array",
        degraded: false,
        run: queries_bare_array,
    },
    RepairStrategy {
        name: "unescaped",
        degraded: false,
        run: queries_unescaped,
    },
    RepairStrategy {
        name: "normalized",
        degraded: false,
        run: queries_normalized,
    },
];

const QUERY_KEYS: &[&str] = &["search_queries", "queries"];

/// Decode a list of search queries, capped at `max`. `None` when nothing usable was found.
pub fn repair_queries(raw: &str, max: usize) -> Option<Repaired<Vec<String>>> {
    let mut r = first_success(raw, QUERY_STRATEGIES)?;
    r.value.truncate(max);
    (!r.value.is_empty()).then_some(r)
}

#[derive(Deserialize)]
struct SearchQueries {
    search_queries: Vec<String>,
}

fn queries_direct(raw: &str) -> Option<Vec<String>> {
    let q: SearchQueries = serde_json::from_str(raw.trim()).ok()?;
    non_empty_strings(q.search_queries)
}

fn queries_fenced(raw: &str) -> Option<Vec<String>> {
    queries_direct(&strip_code_fences(raw)?)
}

fn queries_bare_array(raw: &str) -> Option<Vec<String>> {
    let text = strip_code_fences(raw).unwrap_or_else(|| raw.trim().to_string());
    let list: Vec<String> = serde_json::from_str(text.trim()).ok()?;
    non_empty_strings(list)
}

static ESCAPED_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\+""#).expect("valid regex"));

fn queries_unescaped(raw: &str) -> Option<Vec<String>> {
    // Whole payload encoded as a JSON string literal.
    if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(raw.trim()) {
        if let Some(q) = queries_direct(&inner).or_else(|| queries_bare_array(&inner)) {
            return Some(q);
        }
    }
    let fixed = ESCAPED_QUOTE.replace_all(raw, "\"");
    queries_direct(&fixed).or_else(|| queries_bare_array(&fixed))
}

fn queries_normalized(raw: &str) -> Option<Vec<String>> {
    let v: Value = serde_json::from_str(&normalize_json_text(raw)).ok()?;
    string_list_from_value(&v, QUERY_KEYS)
}

fn non_empty_strings(list: Vec<String>) -> Option<Vec<String>> {
    let mut seen = HashSet::new();
    let out: Vec<String> = list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect();
    (!out.is_empty()).then_some(out)
}

/// A list of strings either bare or under one of `keys`.
pub(crate) fn string_list_from_value(v: &Value, keys: &[&str]) -> Option<Vec<String>> {
    let arr = match v {
        Value::Array(a) => a,
        Value::Object(map) => keys
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))?,
        _ => return None,
    };
    let list = arr
        .iter()
        .filter_map(|s| s.as_str().map(str::to_string))
        .collect();
    non_empty_strings(list)
}

/// Parse model output as JSON, trying the raw text, a fenced block, then normalized text.
pub(crate) fn parse_lenient_value(raw: &str) -> Option<Value> {
    serde_json::from_str(raw.trim())
        .ok()
        .or_else(|| serde_json::from_str(strip_code_fences(raw)?.trim()).ok())
        .or_else(|| serde_json::from_str(&normalize_json_text(raw)).ok())
}

// ---------------------------------------------------------------------------
// Text normalization

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```").expect("valid regex")
});

static DEPENDENCY_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""dependencies"\s*:\s*\[([^\]\[]*)\]"#).expect("valid regex")
});

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

// String literals are matched first so text inside values is never taken for a key.
static UNQUOTED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#)
        .expect("valid regex")
});

static OBJECT_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\}\s*,?\s*\{").expect("valid regex"));

/// The contents of the first fenced code block, or `None` when there is no fence.
pub fn strip_code_fences(raw: &str) -> Option<String> {
    let t = raw.trim();
    if !t.contains("```") {
        return None;
    }
    if let Some(c) = FENCED_BLOCK.captures(t) {
        return c.get(1).map(|m| m.as_str().trim().to_string());
    }
    // Opening fence without a closing one.
    let body = t.trim_start_matches('`');
    let body = body
        .split_once('\n')
        .map(|(first, rest)| {
            if first.trim().chars().all(|ch| ch.is_ascii_alphanumeric()) {
                rest
            } else {
                body
            }
        })
        .unwrap_or(body);
    Some(body.trim_end_matches('`').trim().to_string())
}

/// Fix formatting defects models commonly produce. Output may still be invalid JSON.
pub fn normalize_json_text(raw: &str) -> String {
    let text = strip_code_fences(raw).unwrap_or_else(|| raw.trim().to_string());
    let text = outermost_json_span(&text).unwrap_or(&text).to_string();

    let text = DEPENDENCY_ARRAY.replace_all(&text, |c: &Captures| {
        let items: Vec<&str> = c[1]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        format!("\"dependencies\": [{}]", items.join(", "))
    });
    let text = TRAILING_COMMA.replace_all(&text, "$1");
    let text = UNQUOTED_KEY.replace_all(&text, |c: &Captures| match (c.get(1), c.get(2)) {
        (Some(lead), Some(key)) => format!("{}\"{}\"{}", lead.as_str(), key.as_str(), &c[3]),
        _ => c[0].to_string(),
    });

    let t = text.trim();
    if t.starts_with('{') && !t.contains("\"steps\"") && OBJECT_BOUNDARY.is_match(t) {
        format!("[{}]", OBJECT_BOUNDARY.replace_all(t, "}, {"))
    } else {
        t.to_string()
    }
}

/// Drop prose around the JSON payload: first `{`/`[` to the last `}`/`]`.
fn outermost_json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (end > start).then(|| &text[start..=end])
}
