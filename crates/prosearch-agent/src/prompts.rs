//! Prompt templates. Placeholders are `{name}` and are filled with [`fill`].

pub const ANSWER_PROMPT: &str = "\
Write a thorough, well-organized answer to the question using only the web search results \
in the context below (each result has a title, url and summary). Keep a neutral, factual tone.

Cite facts inline with [number] markers placed at the end of the sentence they support; \
several markers may follow each other, e.g. [1][3]. Do not add a reference list, do not \
print urls, and do not restate the question. Markdown headings, bullets and tables are welcome.

<context>
{context}
</context>

Answer in the language of the question.

Question: {query}
Answer:";

pub const RELATED_QUESTIONS_PROMPT: &str = "\
Suggest {count} short follow-up questions a reader might ask next, based on the original \
question and the search context. Keep them simple and relevant, in the language of the question.

Original question: {query}
<context>
{context}
</context>

Respond with JSON only: {\"related_questions\": [\"...\", \"...\", \"...\"]}";

pub const REPHRASE_PROMPT: &str = "\
Given the conversation below and a follow-up input, rewrite the follow-up as a SHORT standalone \
search query that carries over any context it needs. If the topic clearly changed, ignore the \
earlier messages. Drop anything that does not help retrieval.

Conversation:
{history}

Follow-up input: {query}
Standalone query (reply with the query only):";

pub const QUERY_PLAN_PROMPT: &str = "\
Make a short research plan for answering this query: {query}

Use EXACTLY 2 steps:
1. a step that researches the key information
2. a step that summarizes the findings and answers the query

Reply with raw JSON only, in this shape:
{\"steps\": [
  {\"id\": 0, \"step\": \"Research information about {query}\", \"dependencies\": []},
  {\"id\": 1, \"step\": \"Summarize findings to answer the query\", \"dependencies\": [0]}
]}

Rules:
- the JSON must be valid and keep the outer \"steps\" array
- every step has exactly the fields id, step, dependencies
- a step may only depend on steps listed before it
- no explanations, no markdown code fences";

pub const SEARCH_QUERIES_PROMPT: &str = "\
Write web search queries that gather what is needed to carry out the current research step.

User query: {query}

Context from earlier steps:
{context}

Current step: {step}

Make the queries specific and focused (prefer \"next lunar eclipse dates 2025\" over \"eclipse\").
Reply with raw JSON only, 2 or 3 queries:
{\"search_queries\": [\"first query\", \"second query\", \"third query\"]}";

/// Appended to structured prompts for local models, which drift from JSON more often.
pub const LOCAL_JSON_SUFFIX: &str = "\n\nIMPORTANT: reply with valid JSON only, nothing before \
or after it. Keep arrays on one line, like [0, 1], never spread over several lines.";

/// Structured prompt as sent to the model; local models get [`LOCAL_JSON_SUFFIX`].
pub fn for_model(prompt: &str, local_model: bool) -> String {
    if local_model {
        format!("{prompt}{LOCAL_JSON_SUFFIX}")
    } else {
        prompt.to_string()
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as-is.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{k}}}"), v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_replaces_every_occurrence() {
        let p = fill(QUERY_PLAN_PROMPT, &[("query", "lunar eclipse")]);
        assert!(!p.contains("{query}"));
        assert_eq!(p.matches("lunar eclipse").count(), 2);
        // JSON braces in the template are not placeholders.
        assert!(p.contains("{\"steps\": ["));
    }

    #[test]
    fn fill_leaves_unknown_placeholders() {
        assert_eq!(fill("{a} {b}", &[("a", "x")]), "x {b}");
    }
}
