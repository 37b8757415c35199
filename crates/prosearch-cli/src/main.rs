use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use prosearch::{AgentConfig, AgentSearch, ChatRequest, SearchResult, StreamEvent};
use prosearch_local::FsTurnStore;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

mod logging;

#[derive(Parser, Debug)]
#[command(name = "prosearch")]
#[command(about = "Multi-step agent web search with cited, streamed answers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Research a question and stream the answer (jsonl events or text).
    Ask(AskCmd),
    /// Diagnose configuration issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// The question to research.
    query: String,
    /// Model name; `ollama/<name>` selects a local Ollama model.
    #[arg(long, env = "PROSEARCH_MODEL")]
    model: Option<String>,
    /// Search provider: searxng|tavily (default: the first one configured).
    #[arg(long, env = "PROSEARCH_SEARCH_PROVIDER")]
    provider: Option<String>,
    /// Continue an existing thread; its earlier turns become conversation history.
    #[arg(long)]
    thread_id: Option<u64>,
    /// Skip planning and run a single search+answer pass.
    #[arg(long, default_value_t = false)]
    quick: bool,
    /// Output format: jsonl|text
    #[arg(long = "output", alias = "format", default_value = "jsonl")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// `KEY=VALUE` lines from `PROSEARCH_ENV_FILE`. Never overrides the process env and never
/// logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("PROSEARCH_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("prosearch")
        .join("threads")
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

/// Text mode: the answer as it streams, then related questions and numbered sources.
///
/// A second `BeginStream` means the run restarted its answer; the partial text stays on
/// screen, set apart, and sources are taken from the restarted answer only.
#[derive(Default)]
struct TextRenderer {
    sources: Vec<SearchResult>,
    related: Vec<String>,
    printed: bool,
}

impl TextRenderer {
    fn on_event(&mut self, ev: &StreamEvent, out: &mut impl Write) -> std::io::Result<()> {
        match ev {
            StreamEvent::AgentQueryPlan { steps } => {
                for (i, s) in steps.iter().enumerate() {
                    tracing::info!(step = i, "{s}");
                }
            }
            StreamEvent::BeginStream { .. } => {
                if self.printed {
                    writeln!(out, "\n")?;
                    out.flush()?;
                }
                self.printed = false;
                self.sources.clear();
                self.related.clear();
            }
            StreamEvent::SearchResults { results, .. } => self.sources = results.clone(),
            StreamEvent::TextChunk { text } => {
                self.printed |= !text.is_empty();
                write!(out, "{text}")?;
                out.flush()?;
            }
            StreamEvent::RelatedQueries { related_queries } => {
                self.related = related_queries.clone();
            }
            StreamEvent::StreamEnd { thread_id } => {
                writeln!(out)?;
                if !self.related.is_empty() {
                    writeln!(out, "\nRelated:")?;
                    for q in &self.related {
                        writeln!(out, "- {q}")?;
                    }
                }
                if !self.sources.is_empty() {
                    writeln!(out, "\nSources:")?;
                    for (i, r) in self.sources.iter().enumerate() {
                        writeln!(out, "[{}] {} <{}>", i + 1, r.title, r.url)?;
                    }
                }
                writeln!(out, "\nthread: {thread_id}")?;
            }
            _ => {}
        }
        Ok(())
    }
}

async fn ask(args: AskCmd) -> Result<()> {
    let client = prosearch_local::http_client()?;
    let llm = prosearch_local::llm_from_env(client.clone(), args.model)?;
    let search = prosearch_local::search_from_env(client, args.provider.as_deref())?;
    let store = FsTurnStore::from_env(Some(default_store_dir()))?;

    let history = match args.thread_id {
        Some(id) => store
            .load(id)
            .await?
            .map(|t| t.history())
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let request = ChatRequest {
        thread_id: args.thread_id,
        model: llm.model_name().to_string(),
        query: args.query,
        history,
        pro_search: !args.quick,
    };
    let engine = AgentSearch::new(llm, search, Arc::new(store), AgentConfig::from_env());
    let mut events = engine.stream(request)?;

    let text = args.output.eq_ignore_ascii_case("text");
    let mut renderer = TextRenderer::default();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(ev) = events.next().await {
        if text {
            renderer.on_event(&ev, &mut out)?;
        } else {
            writeln!(out, "{}", serde_json::to_string(&ev)?)?;
            out.flush()?;
        }
        if let StreamEvent::Error { detail } = &ev {
            anyhow::bail!("agent search failed: {detail}");
        }
        if ev.is_terminal() {
            break;
        }
    }
    Ok(())
}

fn doctor(args: DoctorCmd) {
    let t0 = std::time::Instant::now();

    // Env presence only; never print values.
    let openai_compat = prosearch_local::openai_compat_configured();
    let ollama = prosearch_local::ollama_configured();
    let searxng = !prosearch_local::searxng_endpoints_from_env().is_empty();
    let tavily = prosearch_local::tavily_configured();
    let config = AgentConfig::from_env();

    let store = FsTurnStore::from_env(Some(default_store_dir()))
        .unwrap_or_else(|_| FsTurnStore::new(default_store_dir()));
    let store_ok = store.is_writable();

    let checks = vec![
        serde_json::json!({
            "name": "store_dir_writable",
            "ok": store_ok,
            "message": if store_ok { "store dir is writable" } else { "store dir is not writable" },
            "hint": if store_ok { "" } else { "Set PROSEARCH_STORE_DIR to a writable directory." },
        }),
        serde_json::json!({
            "name": "llm_configured",
            "ok": openai_compat || ollama,
            "message": if openai_compat || ollama { "an llm backend is configured" } else { "no llm backend configured" },
            "hint": if openai_compat || ollama {
                ""
            } else {
                "Set PROSEARCH_OPENAI_COMPAT_BASE_URL + PROSEARCH_OPENAI_COMPAT_MODEL, or PROSEARCH_OLLAMA_MODEL (or pass --model ollama/<name>)."
            },
        }),
        serde_json::json!({
            "name": "search_configured",
            "ok": searxng || tavily,
            "message": if searxng || tavily { "a search provider is configured" } else { "no search provider configured" },
            "hint": if searxng || tavily { "" } else { "Set PROSEARCH_SEARXNG_ENDPOINT or PROSEARCH_TAVILY_API_KEY." },
        }),
    ];

    let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "prosearch",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "elapsed_ms": t0.elapsed().as_millis(),
        "configured": {
            "llm": {
                "openai_compat": openai_compat,
                "openai_compat_api_key": has_env("PROSEARCH_OPENAI_COMPAT_API_KEY"),
                "ollama": ollama,
            },
            "providers": {
                "searxng": searxng,
                "tavily": tavily,
            },
            "pro_mode": config.pro_mode_enabled,
            "store_dir": store.root().to_string_lossy().to_string(),
        },
        "checks": checks,
    });

    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("prosearch {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
            println!("store_dir: {}", store.root().display());
            println!("llm: openai_compat={openai_compat} ollama={ollama}");
            println!("providers: searxng={searxng} tavily={tavily}");
            println!("pro_mode: {}", config.pro_mode_enabled);
            println!("checks:");
            for c in &checks {
                let name = c["name"].as_str().unwrap_or("?");
                let ok = c["ok"].as_bool().unwrap_or(false);
                println!("- {}: {}", name, if ok { "ok" } else { "fail" });
            }
        }
        _ => println!("{payload}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ask(args) => ask(args).await?,
        Commands::Doctor(args) => doctor(args),
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "prosearch",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("prosearch {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prosearch::ImageResult;

    fn render(events: &[StreamEvent]) -> String {
        let mut r = TextRenderer::default();
        let mut buf = Vec::new();
        for ev in events {
            r.on_event(ev, &mut buf).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn text_output_lists_sources_after_the_answer() {
        let out = render(&[
            StreamEvent::BeginStream {
                query: "q".to_string(),
            },
            StreamEvent::SearchResults {
                results: vec![SearchResult {
                    title: "Eclipses".to_string(),
                    url: "https://nasa.example/eclipse".to_string(),
                    content: "dates".to_string(),
                }],
                images: vec![ImageResult::from("https://img.example/e.png")],
            },
            StreamEvent::TextChunk {
                text: "Soon [1].".to_string(),
            },
            StreamEvent::RelatedQueries {
                related_queries: vec!["Where is it visible?".to_string()],
            },
            StreamEvent::FinalResponse {
                message: "Soon [1].".to_string(),
            },
            StreamEvent::StreamEnd { thread_id: 7 },
        ]);
        assert!(out.starts_with("Soon [1].\n"));
        assert!(out.contains("Related:\n- Where is it visible?"));
        assert!(out.contains("Sources:\n[1] Eclipses <https://nasa.example/eclipse>"));
        assert!(out.trim_end().ends_with("thread: 7"));
    }

    #[test]
    fn restarted_answer_is_set_apart_from_the_partial_one() {
        let result = |title: &str, url: &str| SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            content: String::new(),
        };
        let out = render(&[
            StreamEvent::BeginStream {
                query: "q".to_string(),
            },
            StreamEvent::SearchResults {
                results: vec![result("Stale", "https://old.example/")],
                images: vec![],
            },
            StreamEvent::TextChunk {
                text: "Partial ans".to_string(),
            },
            StreamEvent::BeginStream {
                query: "q".to_string(),
            },
            StreamEvent::SearchResults {
                results: vec![result("Fresh", "https://new.example/")],
                images: vec![],
            },
            StreamEvent::TextChunk {
                text: "Full answer.".to_string(),
            },
            StreamEvent::FinalResponse {
                message: "Full answer.".to_string(),
            },
            StreamEvent::StreamEnd { thread_id: 1 },
        ]);
        assert!(!out.contains("Partial ansFull"));
        assert!(out.starts_with("Partial ans\n\nFull answer.\n"));
        assert!(out.contains("Sources:\n[1] Fresh <https://new.example/>"));
        assert!(!out.contains("Stale"));
    }

    #[test]
    fn text_output_without_sources_is_just_the_answer() {
        let out = render(&[
            StreamEvent::TextChunk {
                text: "No idea.".to_string(),
            },
            StreamEvent::StreamEnd { thread_id: 1 },
        ]);
        assert_eq!(out, "No idea.\n\nthread: 1\n");
    }
}
