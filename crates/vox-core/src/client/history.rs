//! Per-conversation message history with a fixed length cap.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::message::Message;

/// Messages kept per conversation before the oldest are dropped.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug)]
pub struct HistoryStore {
    limit: usize,
    conversations: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Message>>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a conversation, oldest first. Unknown ids yield an empty list.
    pub fn get(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .get(conversation_id)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn append(&self, conversation_id: &str, messages: impl IntoIterator<Item = Message>) {
        let mut conversations = self.lock();
        let entry = conversations.entry(conversation_id.to_string()).or_default();
        entry.extend(messages);
        while entry.len() > self.limit {
            entry.pop_front();
        }
    }

    /// Replace a conversation wholesale; only the newest `limit` messages are kept.
    pub fn set(&self, conversation_id: &str, messages: Vec<Message>) {
        let skip = messages.len().saturating_sub(self.limit);
        let trimmed: VecDeque<Message> = messages.into_iter().skip(skip).collect();
        self.lock().insert(conversation_id.to_string(), trimmed);
    }

    pub fn clear(&self, conversation_id: &str) {
        self.lock().remove(conversation_id);
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.lock().get(conversation_id).map_or(0, VecDeque::len)
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().len()
    }
}
