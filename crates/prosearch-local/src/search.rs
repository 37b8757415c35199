//! Web search providers: SearXNG (self-hosted, possibly several instances) and Tavily.
//!
//! Both return page results plus image urls. A provider that finds no images returns an
//! empty image list.

use prosearch_core::{
    Error, ImageResult, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_RESULTS_CAP: usize = 20;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Every provider call gets a bounded timeout, 1s..60s, 20s when unset.
fn request_timeout(q: &SearchQuery) -> Duration {
    Duration::from_millis(q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000))
}

fn tavily_key() -> Option<String> {
    env("PROSEARCH_TAVILY_API_KEY").or_else(|| env("TAVILY_API_KEY"))
}

pub fn tavily_configured() -> bool {
    tavily_key().is_some()
}

/// `PROSEARCH_SEARXNG_ENDPOINTS` (comma or whitespace separated) followed by
/// `PROSEARCH_SEARXNG_ENDPOINT`, first occurrence wins.
pub fn searxng_endpoints_from_env() -> Vec<String> {
    let listed = env("PROSEARCH_SEARXNG_ENDPOINTS").unwrap_or_default();
    let single = env("PROSEARCH_SEARXNG_ENDPOINT");
    let mut endpoints: Vec<String> = Vec::new();
    for e in listed
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .chain(single)
    {
        if !endpoints.contains(&e) {
            endpoints.push(e);
        }
    }
    endpoints
}

/// Send, check the status, decode the body. Every failure is an [`Error::Search`].
async fn fetch_json<T: DeserializeOwned>(rb: reqwest::RequestBuilder, provider: &str) -> Result<T> {
    let resp = rb.send().await.map_err(|e| Error::Search(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Search(format!("{provider} search HTTP {status}")));
    }
    resp.json()
        .await
        .map_err(|e| Error::Search(format!("{provider} response: {e}")))
}

fn finish(
    provider: &str,
    results: Vec<SearchResult>,
    images: Vec<ImageResult>,
    t0: Instant,
) -> SearchResponse {
    debug!(
        provider,
        results = results.len(),
        images = images.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "search done"
    );
    SearchResponse {
        results,
        images,
        provider: provider.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SearxngSearchProvider {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearchProvider {
    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "missing PROSEARCH_SEARXNG_ENDPOINT (or PROSEARCH_SEARXNG_ENDPOINTS)".to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        Self::new(client, searxng_endpoints_from_env())
    }

    /// Same query and language always land on the same instance, so instance-side caches
    /// stay warm. FNV-1a, which unlike `RandomState` is stable across processes.
    fn shard_for(&self, q: &SearchQuery) -> &str {
        let lang = q.language.as_deref().unwrap_or("");
        let h = q
            .query
            .bytes()
            .chain(lang.bytes())
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        &self.endpoints[(h % self.endpoints.len() as u64) as usize]
    }

    /// A bare instance url gets `/search` appended; a full search url is used as is.
    fn search_url(endpoint: &str) -> String {
        let base = endpoint.trim().trim_end_matches('/');
        if base.ends_with("/search") {
            base.to_string()
        } else {
            format!("{base}/search")
        }
    }

    async fn search_at(&self, endpoint: &str, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let mut rb = self
            .client
            .get(Self::search_url(endpoint))
            .query(&[("q", q.query.as_str()), ("format", "json")])
            .timeout(request_timeout(q));
        if let Some(lang) = q.language.as_deref() {
            rb = rb.query(&[("language", lang)]);
        }
        let page: SearxngPage = fetch_json(rb, "searxng").await?;
        let (results, images) = page.split(q.max_results.unwrap_or(10).min(MAX_RESULTS_CAP));
        Ok(finish("searxng", results, images, t0))
    }
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        self.search_at(self.shard_for(q), q).await
    }
}

#[derive(Debug, Deserialize)]
struct SearxngPage {
    #[serde(default)]
    results: Vec<SearxngHit>,
}

/// Image-category hits carry `img_src`; they may also have a page url.
#[derive(Debug, Deserialize)]
struct SearxngHit {
    url: Option<String>,
    title: Option<String>,
    content: Option<String>,
    img_src: Option<String>,
}

impl SearxngPage {
    fn split(self, max_results: usize) -> (Vec<SearchResult>, Vec<ImageResult>) {
        let mut results = Vec::new();
        let mut images = Vec::new();
        for hit in self.results {
            if let Some(img) = hit.img_src.filter(|s| !s.trim().is_empty()) {
                images.push(ImageResult::from(img));
            }
            match hit.url {
                Some(url) if results.len() < max_results => results.push(SearchResult {
                    url,
                    title: hit.title.unwrap_or_default(),
                    content: hit.content.unwrap_or_default(),
                }),
                _ => {}
            }
        }
        (results, images)
    }
}

#[derive(Debug, Clone)]
pub struct TavilySearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearchProvider {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_TAVILY_ENDPOINT.to_string()),
        }
    }

    /// Key from `PROSEARCH_TAVILY_API_KEY` or `TAVILY_API_KEY`; endpoint override from
    /// `PROSEARCH_TAVILY_ENDPOINT`.
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let key = tavily_key().ok_or_else(|| {
            Error::NotConfigured("missing PROSEARCH_TAVILY_API_KEY (or TAVILY_API_KEY)".to_string())
        })?;
        Ok(Self::new(client, key, env("PROSEARCH_TAVILY_ENDPOINT")))
    }
}

#[async_trait::async_trait]
impl SearchProvider for TavilySearchProvider {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let body = serde_json::json!({
            "query": q.query,
            "max_results": q.max_results.unwrap_or(6).min(MAX_RESULTS_CAP),
            "search_depth": "basic",
            "include_images": true,
            "include_answer": false,
            "include_raw_content": false,
        });
        let rb = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(request_timeout(q));
        let page: TavilyPage = fetch_json(rb, "tavily").await?;

        let images = page.images.iter().filter_map(tavily_image).collect();
        let results = page
            .results
            .into_iter()
            .map(|h| SearchResult {
                url: h.url,
                title: h.title.unwrap_or_default(),
                content: h.content.unwrap_or_default(),
            })
            .collect();
        Ok(finish("tavily", results, images, t0))
    }
}

#[derive(Debug, Deserialize)]
struct TavilyPage {
    #[serde(default)]
    results: Vec<TavilyHit>,
    #[serde(default)]
    images: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    url: String,
    title: Option<String>,
    content: Option<String>,
}

/// Plain url strings, or `{url, description}` objects when image descriptions are on.
fn tavily_image(v: &Value) -> Option<ImageResult> {
    let url = match v {
        Value::String(s) => s.as_str(),
        Value::Object(m) => m.get("url")?.as_str()?,
        _ => return None,
    };
    (!url.trim().is_empty()).then(|| ImageResult::from(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::{EnvGuard, ENV_LOCK};
    use axum::{extract::Query, routing::get, routing::post, Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn blank_tavily_keys_count_as_unset() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("PROSEARCH_TAVILY_API_KEY", "   ");
        let _g2 = EnvGuard::set("TAVILY_API_KEY", "");
        assert!(!tavily_configured());
        assert!(matches!(
            TavilySearchProvider::from_env(reqwest::Client::new()),
            Err(Error::NotConfigured(_))
        ));
    }

    #[test]
    fn endpoint_list_merges_both_vars_without_duplicates() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("PROSEARCH_SEARXNG_ENDPOINTS", "http://a, http://b http://a");
        let _g2 = EnvGuard::set("PROSEARCH_SEARXNG_ENDPOINT", "http://c");
        assert_eq!(
            searxng_endpoints_from_env(),
            vec!["http://a", "http://b", "http://c"]
        );
    }

    #[test]
    fn shard_choice_is_stable_per_query() {
        let p = SearxngSearchProvider::new(
            reqwest::Client::new(),
            vec!["http://a".to_string(), "http://b".to_string()],
        )
        .unwrap();
        let mut q = SearchQuery::new("hello world");
        q.language = Some("en".to_string());
        let first = p.shard_for(&q).to_string();
        assert_eq!(p.shard_for(&q), first);
        assert!(first == "http://a" || first == "http://b");
    }

    #[test]
    fn search_url_accepts_base_or_full_endpoint() {
        assert_eq!(
            SearxngSearchProvider::search_url("http://s.local/"),
            "http://s.local/search"
        );
        assert_eq!(
            SearxngSearchProvider::search_url("http://s.local/search/"),
            "http://s.local/search"
        );
    }

    #[test]
    fn searxng_requires_an_endpoint() {
        assert!(matches!(
            SearxngSearchProvider::new(reqwest::Client::new(), vec![]),
            Err(Error::NotConfigured(_))
        ));
    }

    #[test]
    fn tavily_images_come_as_strings_or_objects() {
        let page: TavilyPage = serde_json::from_str(
            r#"{
              "results": [{"url":"https://example.com","title":"Example","content":"Hello"}],
              "images": ["https://img.example/a.png", {"url": "https://img.example/b.png", "description": "b"}, 3, ""]
            }"#,
        )
        .unwrap();
        let imgs: Vec<ImageResult> = page.images.iter().filter_map(tavily_image).collect();
        assert_eq!(
            imgs,
            vec![
                ImageResult::from("https://img.example/a.png"),
                ImageResult::from("https://img.example/b.png")
            ]
        );
    }

    #[tokio::test]
    async fn searxng_splits_results_and_images() {
        let app = Router::new().route(
            "/search",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("format").map(String::as_str), Some("json"));
                let q = params.get("q").cloned().unwrap_or_default();
                Json(serde_json::json!({
                    "results": [
                        {"url": "https://a.example", "title": q, "content": "first"},
                        {"url": "https://b.example", "title": "B", "img_src": "https://img.example/b.jpg"},
                        {"title": "no url", "img_src": ""}
                    ]
                }))
            }),
        );
        let addr = serve(app).await;

        let p = SearxngSearchProvider::new(reqwest::Client::new(), vec![format!("http://{addr}/")])
            .unwrap();
        let out = p.search(&SearchQuery::new("eclipse")).await.unwrap();
        assert_eq!(out.provider, "searxng");
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].title, "eclipse");
        assert_eq!(out.results[1].content, "");
        assert_eq!(out.images, vec![ImageResult::from("https://img.example/b.jpg")]);
    }

    #[tokio::test]
    async fn searxng_http_errors_are_search_errors() {
        let app = Router::new().route(
            "/search",
            get(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
        );
        let addr = serve(app).await;
        let p = SearxngSearchProvider::new(reqwest::Client::new(), vec![format!("http://{addr}")])
            .unwrap();
        let err = p.search(&SearchQuery::new("x")).await.unwrap_err();
        assert!(matches!(err, Error::Search(m) if m.contains("503")));
    }

    #[tokio::test]
    async fn tavily_sends_key_and_asks_for_images() {
        let app = Router::new().route(
            "/search",
            post(|headers: axum::http::HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|v| v.to_str().ok()),
                    Some("Bearer tvly-test")
                );
                assert_eq!(body["include_images"], true);
                Json(serde_json::json!({
                    "results": [{"url": "https://t.example", "title": "T", "content": "c"}],
                    "images": ["https://img.example/t.png"]
                }))
            }),
        );
        let addr = serve(app).await;

        let p = TavilySearchProvider::new(
            reqwest::Client::new(),
            "tvly-test",
            Some(format!("http://{addr}/search")),
        );
        let out = p.search(&SearchQuery::new("tides")).await.unwrap();
        assert_eq!(out.provider, "tavily");
        assert_eq!(out.results[0].url, "https://t.example");
        assert_eq!(out.images.len(), 1);
    }
}
