//! Queued, rate-limited completion client.
//!
//! Every call goes through a priority queue drained by a single background
//! loop. Before each dispatch the loop waits for rate-limit headroom; failed
//! calls are retried with exponential backoff and re-queued at the front.
//! The client also keeps capped per-conversation history.

mod history;
mod queue;
mod rate_limit;

pub use history::{HistoryStore, DEFAULT_HISTORY_LIMIT};
pub use queue::{QueuedTask, RequestQueue, TaskId};
pub use rate_limit::{RateLimitConfig, RateLimitStatus, RateLimiter, RATE_LIMIT_WINDOW};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::message::Message;
use crate::provider::{CompletionRequest, CompletionResponse, Provider, ResponseFormat};

/// Backoff and retry budget for failed calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Retry every failure, including ones `Error::is_retryable` rejects
    /// (auth, malformed request). When false only retryable errors are
    /// re-queued.
    pub retry_all_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            retry_all_errors: true,
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^retry_count, max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn should_retry(&self, error: &Error) -> bool {
        self.retry_all_errors || error.is_retryable()
    }
}

/// Client-wide defaults applied to every request.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub history_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1000,
            temperature: 0.7,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    /// Higher is dispatched sooner. Defaults to 0.
    pub priority: i32,
    pub max_retries: Option<u32>,
}

impl CompletionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Handle to a queued completion.
///
/// Dropping it abandons the result only; the call still runs.
pub struct PendingCompletion {
    id: TaskId,
    rx: oneshot::Receiver<Result<CompletionResponse, Error>>,
}

impl PendingCompletion {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn wait(self) -> Result<CompletionResponse, Error> {
        self.rx.await.unwrap_or(Err(Error::Cancelled))
    }
}

struct ClientInner {
    provider: Arc<dyn Provider>,
    config: ClientConfig,
    queue: Mutex<RequestQueue>,
    limiter: RateLimiter,
    history: HistoryStore,
    next_id: AtomicU64,
}

impl ClientInner {
    fn lock_queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Queued, rate-limited client for a chat-completion provider.
///
/// Cheap to clone; clones share the queue, limiter and history. Methods that
/// enqueue work must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct CompletionClient {
    inner: Arc<ClientInner>,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::with_config(provider, ClientConfig::default())
    }

    pub fn with_config(provider: Arc<dyn Provider>, config: ClientConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit);
        let history = HistoryStore::new(config.history_limit);
        Self {
            inner: Arc::new(ClientInner {
                provider,
                config,
                queue: Mutex::new(RequestQueue::new()),
                limiter,
                history,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }

    fn build_request(&self, messages: Vec<Message>, options: &CompletionOptions) -> CompletionRequest {
        let config = &self.inner.config;
        let mut request = CompletionRequest::new(messages)
            .with_max_tokens(options.max_tokens.unwrap_or(config.max_tokens))
            .with_temperature(options.temperature.unwrap_or(config.temperature));
        if let Some(model) = options.model.clone().or_else(|| config.model.clone()) {
            request = request.with_model(model);
        }
        if let Some(format) = options.response_format {
            request = request.with_response_format(format);
        }
        request
    }

    /// Enqueue a completion without waiting for it.
    pub fn submit(&self, messages: Vec<Message>, options: CompletionOptions) -> PendingCompletion {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let request = self.build_request(messages, &options);
        let max_retries = options
            .max_retries
            .unwrap_or(self.inner.config.retry.max_retries);
        let (task, rx) = QueuedTask::new(id, request, options.priority, max_retries);

        debug!(task_id = %id, priority = options.priority, "Queued completion");
        self.inner.lock_queue().insert(task);
        ensure_draining(&self.inner);

        PendingCompletion { id, rx }
    }

    /// Enqueue a completion and wait for its final outcome.
    pub async fn send_completion(
        &self,
        messages: Vec<Message>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, Error> {
        self.submit(messages, options).wait().await
    }

    /// Send `text` with the stored history of `conversation_id` prepended.
    ///
    /// On success both the user message and the reply are appended to the
    /// history; on failure the history is left untouched.
    pub async fn send_with_history(
        &self,
        text: &str,
        conversation_id: &str,
        system_prompt: Option<&str>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, Error> {
        let history = self.inner.history.get(conversation_id);
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system_prompt {
            messages.push(Message::system(system));
        }
        messages.extend(history);
        messages.push(Message::user(text));

        let response = self.send_completion(messages, options).await?;
        self.inner.history.append(
            conversation_id,
            [Message::user(text), response.message.clone()],
        );
        Ok(response)
    }

    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.inner.history.get(conversation_id)
    }

    pub fn set_history(&self, conversation_id: &str, messages: Vec<Message>) {
        self.inner.history.set(conversation_id, messages);
    }

    pub fn clear_history(&self, conversation_id: &str) {
        self.inner.history.clear(conversation_id);
    }

    pub fn clear_all_history(&self) {
        self.inner.history.clear_all();
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.inner.limiter.status()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock_queue().len()
    }
}

/// Start a drain loop unless one is already running.
fn ensure_draining(inner: &Arc<ClientInner>) {
    if inner.lock_queue().try_start_draining() {
        tokio::spawn(drain(inner.clone()));
    }
}

async fn drain(inner: Arc<ClientInner>) {
    loop {
        let next = {
            let mut queue = inner.lock_queue();
            let next = queue.pop_front();
            if next.is_none() {
                queue.stop_draining();
            }
            next
        };
        let Some(task) = next else {
            debug!("Completion queue drained");
            return;
        };
        dispatch(&inner, task).await;
    }
}

async fn dispatch(inner: &Arc<ClientInner>, mut task: QueuedTask) {
    inner
        .limiter
        .acquire(task.request.estimated_tokens())
        .await;

    debug!(task_id = %task.id, attempt = task.retry_count + 1, "Dispatching completion");
    match inner.provider.complete(task.request.clone()).await {
        Ok(response) => {
            if !task.resolve(Ok(response)) {
                debug!("Completion finished after caller stopped waiting");
            }
        }
        Err(err) if task.can_retry() && inner.config.retry.should_retry(&err) => {
            task.retry_count += 1;
            let delay = inner.config.retry.backoff(task.retry_count);
            warn!(
                task_id = %task.id,
                retry = task.retry_count,
                max_retries = task.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Completion failed, scheduling retry"
            );
            let inner = inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.lock_queue().push_front(task);
                ensure_draining(&inner);
            });
        }
        Err(err) => {
            error!(
                task_id = %task.id,
                attempts = task.retry_count + 1,
                category = %err.category(),
                error = %err,
                "Completion failed permanently"
            );
            task.resolve(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use tokio::time::Instant;

    fn client_with(provider: Arc<MockProvider>, config: ClientConfig) -> CompletionClient {
        CompletionClient::with_config(provider, config)
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8000));
        assert_eq!(policy.backoff(5), Duration::from_millis(30_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_should_retry_respects_classification() {
        let strict = RetryPolicy {
            retry_all_errors: false,
            ..RetryPolicy::default()
        };
        assert!(strict.should_retry(&Error::network("reset")));
        assert!(!strict.should_retry(&Error::auth("bad key")));
        assert!(RetryPolicy::default().should_retry(&Error::auth("bad key")));
    }

    #[tokio::test]
    async fn test_send_completion_applies_defaults() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("pong");
        let client = client_with(
            provider.clone(),
            ClientConfig {
                model: Some("gpt-4o-mini".into()),
                ..ClientConfig::default()
            },
        );

        let response = client
            .send_completion(vec![Message::user("ping")], CompletionOptions::new().with_max_tokens(50))
            .await
            .unwrap();
        assert_eq!(response.text(), "pong");

        let request = provider.last_request().unwrap();
        assert_eq!(request.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(request.max_tokens, Some(50));
        assert_eq!(request.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn test_priority_order_with_fifo_ties() {
        let provider = Arc::new(MockProvider::new());
        provider.always_respond("ok");
        let client = client_with(provider.clone(), ClientConfig::default());

        // Nothing runs until this task yields, so all five are queued first.
        let pending: Vec<_> = [1, 1, 5, 1, 1]
            .into_iter()
            .enumerate()
            .map(|(i, priority)| {
                client.submit(
                    vec![Message::user(format!("task {}", i))],
                    CompletionOptions::new().with_priority(priority),
                )
            })
            .collect();
        assert_eq!(client.queue_len(), 5);

        for p in pending {
            p.wait().await.unwrap();
        }

        assert_eq!(
            provider.user_prompts(),
            vec!["task 2", "task 0", "task 1", "task 3", "task 4"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_attempts_max_plus_one() {
        let provider = Arc::new(MockProvider::new());
        provider.always_fail("connection reset");
        let client = client_with(provider.clone(), ClientConfig::default());

        let start = Instant::now();
        let result = client
            .send_completion(vec![Message::user("hello")], CompletionOptions::new())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(provider.request_count(), 4);
        // 2s + 4s + 8s of backoff
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error(Error::api(503, "overloaded"));
        provider.queue_response("recovered");
        let client = client_with(provider.clone(), ClientConfig::default());

        let response = client
            .send_completion(vec![Message::user("hello")], CompletionOptions::new())
            .await
            .unwrap();
        assert_eq!(response.text(), "recovered");
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_does_not_block_queue() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error(Error::network("first attempt fails"));
        provider.always_respond("fine");
        let client = client_with(provider.clone(), ClientConfig::default());

        let flaky = client.submit(vec![Message::user("flaky")], CompletionOptions::new());
        let steady = client.submit(vec![Message::user("steady")], CompletionOptions::new());

        let steady_done = steady.wait().await.unwrap();
        assert_eq!(steady_done.text(), "fine");
        // The retry is still sleeping in backoff when the second task finishes.
        assert_eq!(provider.user_prompts(), vec!["flaky", "steady"]);

        flaky.wait().await.unwrap();
        assert_eq!(provider.user_prompts(), vec!["flaky", "steady", "flaky"]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_when_classification_enabled() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error(Error::auth("invalid key"));
        let client = client_with(
            provider.clone(),
            ClientConfig {
                retry: RetryPolicy {
                    retry_all_errors: false,
                    ..RetryPolicy::default()
                },
                ..ClientConfig::default()
            },
        );

        let err = client
            .send_completion(vec![Message::user("hi")], CompletionOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delays_sixth_request() {
        let provider = Arc::new(MockProvider::new());
        provider.always_respond("ok");
        let client = client_with(
            provider.clone(),
            ClientConfig {
                rate_limit: RateLimitConfig {
                    requests_per_minute: 5,
                    tokens_per_minute: 1_000_000,
                },
                ..ClientConfig::default()
            },
        );

        // An idle client must not count the idle time toward the first window.
        tokio::time::advance(Duration::from_secs(50)).await;

        let pending: Vec<_> = (0..6)
            .map(|i| client.submit(vec![Message::user(format!("r{}", i))], CompletionOptions::new()))
            .collect();
        for p in pending {
            p.wait().await.unwrap();
        }

        let times = provider.call_times();
        assert_eq!(times.len(), 6);
        for t in &times[1..5] {
            assert!(t.duration_since(times[0]) < Duration::from_secs(1));
        }
        assert!(times[5].duration_since(times[0]) >= RATE_LIMIT_WINDOW);
    }

    #[tokio::test]
    async fn test_send_with_history_records_exchange() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("Hi there");
        provider.queue_response("You said hello");
        let client = client_with(provider.clone(), ClientConfig::default());

        client
            .send_with_history("hello", "conv", Some("Be friendly."), CompletionOptions::new())
            .await
            .unwrap();
        client
            .send_with_history("what did I say?", "conv", Some("Be friendly."), CompletionOptions::new())
            .await
            .unwrap();

        let request = provider.last_request().unwrap();
        let roles: Vec<_> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                crate::Role::System,
                crate::Role::User,
                crate::Role::Assistant,
                crate::Role::User
            ]
        );
        assert_eq!(request.messages[1].content, "hello");
        assert_eq!(request.messages[2].content, "Hi there");

        let history = client.history("conv");
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].content, "You said hello");
    }

    #[tokio::test]
    async fn test_failed_send_leaves_history_untouched() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error(Error::invalid_request("bad"));
        let client = client_with(
            provider.clone(),
            ClientConfig {
                retry: RetryPolicy {
                    max_retries: 0,
                    ..RetryPolicy::default()
                },
                ..ClientConfig::default()
            },
        );

        let result = client
            .send_with_history("hello", "conv", None, CompletionOptions::new())
            .await;
        assert!(result.is_err());
        assert!(client.history("conv").is_empty());
    }

    #[tokio::test]
    async fn test_history_management() {
        let client = CompletionClient::new(Arc::new(MockProvider::new()));
        client.set_history("a", vec![Message::user("one"), Message::assistant("two")]);
        client.set_history("b", vec![Message::user("three")]);
        assert_eq!(client.history("a").len(), 2);

        client.clear_history("a");
        assert!(client.history("a").is_empty());
        assert_eq!(client.history("b").len(), 1);

        client.clear_all_history();
        assert!(client.history("b").is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_completion_still_runs() {
        let provider = Arc::new(MockProvider::new());
        provider.always_respond("ok");
        let client = client_with(provider.clone(), ClientConfig::default());

        drop(client.submit(vec![Message::user("fire and forget")], CompletionOptions::new()));
        client
            .send_completion(vec![Message::user("second")], CompletionOptions::new())
            .await
            .unwrap();

        assert_eq!(provider.user_prompts(), vec!["fire and forget", "second"]);
    }
}
