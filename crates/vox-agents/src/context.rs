//! Per-query context: tool findings, relevance ranking and the enhanced
//! prompt sent to the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vox_core::Capability;

/// Query words this short or shorter are ignored when scoring.
const MIN_SCORED_WORD_LEN: usize = 2;

/// Fraction of the query's scorable words that appear inside some word of
/// `content`. Both sides are lower-cased; the result is in `[0, 1]`.
pub fn relevance_score(query: &str, content: &str) -> f32 {
    let query = query.to_lowercase();
    let query_words: Vec<&str> = query
        .split_whitespace()
        .filter(|w| w.chars().count() > MIN_SCORED_WORD_LEN)
        .collect();
    if query_words.is_empty() {
        return 0.0;
    }

    let content = content.to_lowercase();
    let content_words: Vec<&str> = content.split_whitespace().collect();
    let matched = query_words
        .iter()
        .filter(|qw| content_words.iter().any(|cw| cw.contains(*qw)))
        .count();

    matched as f32 / query_words.len() as f32
}

/// One tool's contribution to the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the tool that produced it.
    pub source: String,
    pub capability: Capability,
    pub content: String,
    pub relevance: f32,
}

#[derive(Debug, Clone)]
pub struct AgentContext {
    pub query: String,
    pub findings: Vec<Finding>,
    pub tools_used: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            findings: Vec::new(),
            tools_used: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Record a tool result, scoring it against the query.
    pub fn add_result(&mut self, source: &str, capability: Capability, content: String) {
        let relevance = relevance_score(&self.query, &content);
        self.add_finding(Finding {
            source: source.to_string(),
            capability,
            content,
            relevance,
        });
    }

    pub fn add_finding(&mut self, finding: Finding) {
        if !self.tools_used.contains(&finding.source) {
            self.tools_used.push(finding.source.clone());
        }
        self.findings.push(finding);
    }

    /// Sort findings by descending relevance and keep the best `limit`.
    /// Equal scores keep their insertion order.
    pub fn rank(&mut self, limit: usize) {
        self.findings
            .sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        self.findings.truncate(limit);
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// The prompt to send: the bare query when nothing was found, otherwise
    /// the query with labeled findings and answering instructions.
    pub fn build_prompt(&self) -> String {
        if self.findings.is_empty() {
            return self.query.clone();
        }

        let mut prompt = format!("User question: {}\n\nRelevant information:\n", self.query);
        for (i, finding) in self.findings.iter().enumerate() {
            prompt.push_str(&format!(
                "\n[{}] From {} (relevance {:.2}):\n{}\n",
                i + 1,
                finding.source,
                finding.relevance,
                finding.content.trim()
            ));
        }
        prompt.push_str(
            "\nAnswer the user's question using the information above where it applies. \
             Cite the bracketed source number for any fact taken from it. \
             If the information does not cover the question, say so and answer from general knowledge.",
        );
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(source: &str, relevance: f32) -> Finding {
        Finding {
            source: source.to_string(),
            capability: Capability::WebSearch,
            content: format!("content from {}", source),
            relevance,
        }
    }

    #[test]
    fn test_relevance_score() {
        assert_eq!(relevance_score("rust async runtime", "Tokio is an async runtime"), 2.0 / 3.0);
        assert_eq!(relevance_score("Weather PARIS", "paris weather: sunny"), 1.0);
        assert_eq!(relevance_score("is it on", "anything"), 0.0);
        assert_eq!(relevance_score("", "anything"), 0.0);
        assert_eq!(relevance_score("stock price", "nothing related"), 0.0);
    }

    #[test]
    fn test_relevance_matches_inside_longer_words() {
        // "run" is contained in "running"
        assert_eq!(relevance_score("run", "running fast"), 1.0);
    }

    #[test]
    fn test_rank_orders_by_relevance() {
        let mut context = AgentContext::new("q");
        context.add_finding(finding("a", 0.2));
        context.add_finding(finding("b", 0.9));
        context.add_finding(finding("c", 0.5));
        context.rank(5);

        let scores: Vec<f32> = context.findings.iter().map(|f| f.relevance).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
    }

    #[test]
    fn test_rank_truncates_and_is_stable() {
        let mut context = AgentContext::new("q");
        for (i, score) in [0.1, 0.5, 0.5, 0.3, 0.5, 0.9, 0.2].into_iter().enumerate() {
            context.add_finding(finding(&format!("t{}", i), score));
        }
        context.rank(5);

        let sources: Vec<&str> = context.findings.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, vec!["t5", "t1", "t2", "t4", "t3"]);
    }

    #[test]
    fn test_prompt_without_findings_is_query() {
        let context = AgentContext::new("Explain how binary search works");
        assert_eq!(context.build_prompt(), "Explain how binary search works");
    }

    #[test]
    fn test_prompt_with_findings() {
        let mut context = AgentContext::new("What is 12 * 7?");
        context.add_result("calculator", Capability::Calculation, "12 * 7 = 84".to_string());
        let prompt = context.build_prompt();

        assert!(prompt.starts_with("User question: What is 12 * 7?"));
        assert!(prompt.contains("[1] From calculator"));
        assert!(prompt.contains("12 * 7 = 84"));
        assert!(prompt.contains("general knowledge"));
        assert_eq!(context.tools_used, vec!["calculator"]);
    }
}
