//! Web search tool backed by a JSON search API (Tavily-compatible).

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vox_core::{Capability, Error, Tool};

const DEFAULT_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_SUPPORTING_SNIPPETS: usize = 3;
const MAX_RESULT_SNIPPETS: usize = 5;
const SNIPPET_CHARS: usize = 300;

static ACTIVATION_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\b(news|latest|current|currently|recent|recently|breaking|update[sd]?|today|tonight|this (week|month|year))\b",
        r"(?i)\b(weather|forecast|temperature|stocks?|price|prices|market|score|scores|election|trending)\b",
        r"(?i)\bwhat(\s+is|\s+are|\s+was|\s+were|'s)\b",
        r"(?i)\b(how to|who is|who are|who won|where is|when is|when does)\b",
        r"(?i)\b(search for|search the web|look up|lookup|google)\b",
    ])
    .expect("web search activation patterns are valid")
});

/// Configuration for the web search tool
#[derive(Clone, Debug)]
pub struct WebSearchConfig {
    /// API key sent in the request body. Checked when a search runs.
    pub api_key: Option<String>,
    /// Search endpoint URL
    pub endpoint: String,
    /// Results requested from the API
    pub max_results: usize,
    pub timeout: Duration,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: MAX_RESULT_SNIPPETS,
            timeout: Duration::from_secs(30),
        }
    }
}

impl WebSearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    published_date: Option<String>,
}

pub struct WebSearchTool {
    client: Client,
    config: WebSearchConfig,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent("vox/0.1.0")
                .timeout(config.timeout)
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    fn api_key(&self) -> Result<&str, Error> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::config("web search API key is not configured"))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current events, news and other real-time information."
    }

    fn capability(&self) -> Capability {
        Capability::WebSearch
    }

    fn should_activate(&self, query: &str) -> bool {
        ACTIVATION_PATTERNS.is_match(query)
    }

    async fn execute(&self, query: &str) -> Result<String, Error> {
        let api_key = self.api_key()?;

        let request = SearchRequest {
            api_key,
            query,
            search_depth: "basic",
            include_answer: true,
            max_results: self.config.max_results,
        };

        debug!(endpoint = %self.config.endpoint, "Running web search");
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::tool("web_search", format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::tool(
                "web_search",
                format!("Search API error {}: {}", status, body),
            ));
        }

        let result: SearchResponse = response.json().await.map_err(|e| {
            Error::tool("web_search", format!("Failed to parse search response: {}", e))
        })?;

        Ok(format_results(query, result))
    }
}

fn snippet(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

fn format_result(index: usize, result: &SearchResult) -> String {
    let mut line = format!("{}. {}", index + 1, result.title.trim());
    if let Some(date) = result.published_date.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(&format!(" ({})", date));
    }
    line.push_str(&format!("\n   {}", snippet(&result.content)));
    if !result.url.is_empty() {
        line.push_str(&format!("\n   Source: {}", result.url));
    }
    line
}

fn format_results(query: &str, response: SearchResponse) -> String {
    let answer = response
        .answer
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());

    if let Some(answer) = answer {
        let mut output = format!("Answer: {}", answer);
        if !response.results.is_empty() {
            output.push_str("\n\nSupporting sources:\n");
            let lines: Vec<_> = response
                .results
                .iter()
                .take(MAX_SUPPORTING_SNIPPETS)
                .enumerate()
                .map(|(i, r)| format_result(i, r))
                .collect();
            output.push_str(&lines.join("\n"));
        }
        return output;
    }

    if response.results.is_empty() {
        return format!("No web results found for \"{}\".", query);
    }

    let lines: Vec<_> = response
        .results
        .iter()
        .take(MAX_RESULT_SNIPPETS)
        .enumerate()
        .map(|(i, r)| format_result(i, r))
        .collect();
    format!("Search results for \"{}\":\n{}", query, lines.join("\n"))
}
