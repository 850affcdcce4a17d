//! Priority work queue for pending completion calls.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::provider::{CompletionRequest, CompletionResponse};

/// Unique identifier for a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending call to the completion endpoint.
///
/// The request is kept so the call can be re-issued on retry; the outcome is
/// delivered exactly once through `responder`.
pub struct QueuedTask {
    pub id: TaskId,
    pub request: CompletionRequest,
    /// Higher runs sooner.
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    responder: oneshot::Sender<Result<CompletionResponse, Error>>,
}

impl QueuedTask {
    pub fn new(
        id: TaskId,
        request: CompletionRequest,
        priority: i32,
        max_retries: u32,
    ) -> (Self, oneshot::Receiver<Result<CompletionResponse, Error>>) {
        let (responder, rx) = oneshot::channel();
        let task = Self {
            id,
            request,
            priority,
            retry_count: 0,
            max_retries,
            responder,
        };
        (task, rx)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Deliver the final outcome. Returns false if the caller stopped waiting.
    pub fn resolve(self, result: Result<CompletionResponse, Error>) -> bool {
        self.responder.send(result).is_ok()
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Strict priority ordering with FIFO among equal priorities.
///
/// The `draining` flag records whether a drain loop currently owns the queue;
/// it is flipped only while the queue lock is held.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<QueuedTask>,
    draining: bool,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first entry with a strictly lower priority.
    pub fn insert(&mut self, task: QueuedTask) {
        let position = self
            .entries
            .iter()
            .position(|queued| queued.priority < task.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, task);
    }

    /// Put a task back at the head, ahead of everything else. Used for retries.
    pub fn push_front(&mut self, task: QueuedTask) {
        self.entries.push_front(task);
    }

    pub fn pop_front(&mut self) -> Option<QueuedTask> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Claim the queue for a new drain loop. Returns false when a loop is
    /// already running or there is nothing to drain.
    pub fn try_start_draining(&mut self) -> bool {
        if self.draining || self.entries.is_empty() {
            return false;
        }
        self.draining = true;
        true
    }

    pub fn stop_draining(&mut self) {
        self.draining = false;
    }
}
