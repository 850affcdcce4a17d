//! The agent pipeline: classify, run tools, rank findings, ask the model.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use vox_core::{Capability, CompletionClient, CompletionOptions, Result, Tool, ToolRegistry};
use vox_providers::OpenAIProvider;
use vox_tools::{create_default_tools, WebSearchConfig};

use crate::classifier::{IntentAnalysis, IntentClassifier, IntentSource};
use crate::config::Settings;
use crate::context::{AgentContext, Finding};
use crate::stats::{UsageSnapshot, UsageStats};

const DEFAULT_MAX_CONTEXT_RESULTS: usize = 5;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// System prompt sent with every final completion.
    pub system_prompt: Option<String>,
    /// Findings kept after ranking.
    pub max_context_results: usize,
    /// Options for the final completion call.
    pub completion: CompletionOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_context_results: DEFAULT_MAX_CONTEXT_RESULTS,
            completion: CompletionOptions::default(),
        }
    }
}

/// Everything a run produced, for callers that want more than the answer.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub answer: String,
    pub intent: IntentAnalysis,
    /// Tools whose results made it into the context, in execution order.
    pub tools_used: Vec<String>,
    /// Ranked findings, most relevant first.
    pub findings: Vec<Finding>,
    /// The prompt actually sent to the model.
    pub prompt: String,
}

pub struct AgentPipeline {
    client: CompletionClient,
    classifier: IntentClassifier,
    tools: ToolRegistry,
    stats: UsageStats,
    config: PipelineConfig,
}

impl AgentPipeline {
    pub fn new(client: CompletionClient, tools: ToolRegistry) -> Self {
        Self {
            classifier: IntentClassifier::new(client.clone()),
            client,
            tools,
            stats: UsageStats::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the whole stack from settings: OpenAI-compatible provider,
    /// completion client and the enabled default tools.
    ///
    /// Fails with a configuration error when the chat API key is missing.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = OpenAIProvider::from_key(settings.api.api_key.as_deref())?
            .with_base_url(&settings.api.base_url)
            .with_default_model(&settings.api.model);
        let client = CompletionClient::with_config(Arc::new(provider), settings.client_config());

        let agent = &settings.agent;
        let tools: ToolRegistry = create_default_tools(WebSearchConfig::from(&settings.search))
            .into_iter()
            .filter(|tool| match tool.capability() {
                Capability::WebSearch => agent.enable_web_search,
                Capability::Calculation => agent.enable_calculator,
                Capability::DateTime => agent.enable_datetime,
            })
            .collect();

        Ok(Self::new(client, tools).with_config(PipelineConfig {
            system_prompt: Some(agent.system_prompt.clone()),
            max_context_results: agent.max_context_results,
            completion: CompletionOptions::default(),
        }))
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn stats(&self) -> UsageSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Answer `query` within `conversation_id`.
    pub async fn run(&self, query: &str, conversation_id: &str) -> Result<String> {
        Ok(self.run_with_context(query, conversation_id).await?.answer)
    }

    /// Like [`run`](Self::run), also returning the intent and findings.
    pub async fn run_with_context(
        &self,
        query: &str,
        conversation_id: &str,
    ) -> Result<PipelineReport> {
        self.stats.record_query();

        let intent = self.classifier.classify(query).await;
        if intent.source == IntentSource::Local && !intent.needs_web_search {
            self.stats.record_call_avoided();
        }
        debug!(
            source = ?intent.source,
            web = intent.needs_web_search,
            calc = intent.needs_calculation,
            date_time = intent.needs_date_time,
            "Classified query"
        );

        let context = self.gather(query, &intent).await;
        let prompt = context.build_prompt();

        let response = self
            .client
            .send_with_history(
                &prompt,
                conversation_id,
                self.config.system_prompt.as_deref(),
                self.config.completion.clone(),
            )
            .await?;

        Ok(PipelineReport {
            answer: response.text().to_string(),
            intent,
            tools_used: context.tools_used,
            findings: context.findings,
            prompt,
        })
    }

    /// Run every active tool concurrently and rank what comes back.
    /// Failed tools are logged and left out.
    async fn gather(&self, query: &str, intent: &IntentAnalysis) -> AgentContext {
        let active: Vec<&Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|tool| tool.should_activate(query) || intent.requests(tool.capability()))
            .collect();

        let mut context = AgentContext::new(query);
        if active.is_empty() {
            return context;
        }
        info!(
            tools = ?active.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Running tools"
        );

        let stats = &self.stats;
        let outcomes = join_all(active.into_iter().map(|tool| async move {
            stats.record_tool(tool.capability());
            (tool, tool.execute(query).await)
        }))
        .await;

        for (tool, outcome) in outcomes {
            match outcome {
                Ok(content) => context.add_result(tool.name(), tool.capability(), content),
                Err(e) => warn!(
                    tool = tool.name(),
                    error = %e,
                    category = %e.category(),
                    "Tool failed, excluding its result"
                ),
            }
        }

        context.rank(self.config.max_context_results);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vox_core::testing::MockProvider;
    use vox_core::{Error, ErrorCategory, Role};
    use vox_tools::{CalculatorTool, WebSearchTool};

    /// Tool with fixed output that never self-activates unless told to.
    struct StubTool {
        name: &'static str,
        capability: Capability,
        activate: bool,
        output: &'static str,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Fixed output"
        }

        fn capability(&self) -> Capability {
            self.capability
        }

        fn should_activate(&self, _query: &str) -> bool {
            self.activate
        }

        async fn execute(&self, _query: &str) -> std::result::Result<String, Error> {
            Ok(self.output.to_string())
        }
    }

    fn stub(name: &'static str, capability: Capability, activate: bool, output: &'static str) -> Arc<dyn Tool> {
        Arc::new(StubTool {
            name,
            capability,
            activate,
            output,
        })
    }

    fn pipeline(provider: &Arc<MockProvider>, tools: Vec<Arc<dyn Tool>>) -> AgentPipeline {
        let client = CompletionClient::new(provider.clone());
        AgentPipeline::new(client, tools.into_iter().collect())
    }

    #[tokio::test]
    async fn test_no_tools_sends_query_unmodified() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("Binary search halves the range each step.");
        let pipeline = pipeline(
            &provider,
            vec![
                Arc::new(WebSearchTool::new(WebSearchConfig::default())),
                Arc::new(CalculatorTool::new()),
            ],
        );

        let report = pipeline
            .run_with_context("Explain how binary search works", "c1")
            .await
            .unwrap();

        assert_eq!(report.answer, "Binary search halves the range each step.");
        assert!(report.findings.is_empty());
        assert_eq!(report.prompt, "Explain how binary search works");
        // Only the final completion; classification stayed local.
        assert_eq!(provider.request_count(), 1);
        assert_eq!(provider.user_prompts(), vec!["Explain how binary search works"]);

        let stats = pipeline.stats();
        assert_eq!(stats.queries, 1);
        assert_eq!(stats.calls_avoided, 1);
        assert_eq!(stats.web_searches, 0);
    }

    #[tokio::test]
    async fn test_tool_failure_is_excluded() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("12 times 7 is 84.");
        // No search key: web search activates on "What is" and then fails.
        let pipeline = pipeline(
            &provider,
            vec![
                Arc::new(WebSearchTool::new(WebSearchConfig::default())),
                Arc::new(CalculatorTool::new()),
            ],
        );

        let report = pipeline.run_with_context("What is 12 * 7?", "c1").await.unwrap();

        assert_eq!(report.answer, "12 times 7 is 84.");
        assert_eq!(report.tools_used, vec!["calculator"]);
        assert_eq!(report.findings.len(), 1);
        assert!(report.findings[0].content.contains("84"));
        assert!(report.prompt.contains("12 * 7 = 84"));
        assert_eq!(provider.request_count(), 1);

        let stats = pipeline.stats();
        assert_eq!(stats.web_searches, 1);
        assert_eq!(stats.calculations, 1);
    }

    #[tokio::test]
    async fn test_intent_activates_web_search() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response(
            r#"{"needsWebSearch": true, "needsRealTimeInfo": true, "categories": ["weather"], "reasoning": "live weather"}"#,
        );
        provider.queue_response("It is sunny in Paris.");
        let pipeline = pipeline(
            &provider,
            vec![stub(
                "search",
                Capability::WebSearch,
                false,
                "Paris weather today: sunny, 21C",
            )],
        );

        let report = pipeline
            .run_with_context("What's the current weather in Paris today?", "c1")
            .await
            .unwrap();

        assert!(report.intent.needs_web_search);
        assert_eq!(report.intent.source, IntentSource::Model);
        assert_eq!(report.tools_used, vec!["search"]);
        assert!(report.prompt.contains("sunny, 21C"));
        assert_eq!(provider.request_count(), 2);
        assert_eq!(pipeline.stats().web_searches, 1);
        assert_eq!(pipeline.stats().calls_avoided, 0);
    }

    #[tokio::test]
    async fn test_findings_ranked_and_truncated() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("{}");
        provider.queue_response("Tokio.");
        let pipeline = pipeline(
            &provider,
            vec![
                stub("weak", Capability::DateTime, true, "unrelated text"),
                stub("strong", Capability::WebSearch, true, "tokio is the rust async runtime"),
                stub("partial", Capability::Calculation, true, "an async thing"),
            ],
        )
        .with_config(PipelineConfig {
            max_context_results: 2,
            ..PipelineConfig::default()
        });

        let report = pipeline
            .run_with_context("rust async runtime", "c1")
            .await
            .unwrap();

        let sources: Vec<&str> = report.findings.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, vec!["strong", "partial"]);
        assert_eq!(report.findings[0].relevance, 1.0);
        assert!(report.prompt.find("[1] From strong").unwrap() < report.prompt.find("[2] From partial").unwrap());
        assert!(!report.prompt.contains("unrelated text"));
    }

    #[tokio::test]
    async fn test_history_and_system_prompt() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("First answer.");
        provider.queue_response("Second answer.");
        let pipeline = pipeline(&provider, Vec::new()).with_config(PipelineConfig {
            system_prompt: Some("Be brief.".to_string()),
            ..PipelineConfig::default()
        });

        pipeline.run("Explain recursion", "conv").await.unwrap();
        let answer = pipeline.run("Explain closures", "conv").await.unwrap();
        assert_eq!(answer, "Second answer.");

        let request = provider.last_request().unwrap();
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(request.messages[0].content, "Be brief.");
        assert_eq!(pipeline.client().history("conv").len(), 4);
    }

    #[tokio::test]
    async fn test_final_completion_failure_propagates() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error(Error::auth("invalid key"));
        let client = CompletionClient::with_config(
            provider.clone(),
            vox_core::ClientConfig {
                retry: vox_core::RetryPolicy {
                    max_retries: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let pipeline = AgentPipeline::new(client, ToolRegistry::new());

        let err = pipeline.run("Explain recursion", "c").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Upstream);
        assert_eq!(err.upstream_code(), Some(401));
        assert!(pipeline.client().history("c").is_empty());
    }

    #[test]
    fn test_from_settings_requires_api_key() {
        let err = AgentPipeline::from_settings(&Settings::default())
            .err()
            .unwrap();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_from_settings_filters_disabled_tools() {
        let mut settings = Settings::default();
        settings.api.api_key = Some("sk-test".to_string());
        let pipeline = AgentPipeline::from_settings(&settings).unwrap();
        assert_eq!(pipeline.tools().names(), vec!["web_search", "calculator", "date_time"]);

        settings.agent.enable_web_search = false;
        settings.agent.enable_datetime = false;
        let pipeline = AgentPipeline::from_settings(&settings).unwrap();
        assert_eq!(pipeline.tools().names(), vec!["calculator"]);
    }
}
