//! The shared scratchpad passed through an ensemble run: a key/value store
//! plus a global message log and per-agent message logs, with snapshot/
//! restore/clone semantics.
//!
//! Grounded on the reference toolkit's `Orchestration` conversation-history
//! bookkeeping (`conversation_history` + `agent_message_cursors`) and its
//! FIFO history-trimming helper in `llm_session.rs`/`context_strategy.rs`,
//! generalized into a standalone type any conductor can share.

use crate::conclave::message::Message;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A point-in-time, pure-value copy of a [`SharedContext`]'s contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    pub data: HashMap<String, JsonValue>,
    pub history: Vec<Message>,
    pub agent_messages: HashMap<String, Vec<Message>>,
    pub timestamp: DateTime<Utc>,
}

struct Inner {
    data: HashMap<String, JsonValue>,
    history: Vec<Message>,
    agent_messages: HashMap<String, Vec<Message>>,
    max_history_length: usize,
}

/// Mutable state threaded through a single ensemble run.
///
/// Reads (snapshot, list) and writes (append, insert) go through a
/// `tokio::sync::RwLock` so concurrent agent steps under the parallel
/// conductor never tear a snapshot, and each individual append is atomic.
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<RwLock<Inner>>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedContext {
    pub fn new() -> Self {
        SharedContext::with_max_history_length(1000)
    }

    pub fn with_max_history_length(max_history_length: usize) -> Self {
        SharedContext {
            inner: Arc::new(RwLock::new(Inner {
                data: HashMap::new(),
                history: Vec::new(),
                agent_messages: HashMap::new(),
                max_history_length,
            })),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: JsonValue) {
        let mut inner = self.inner.write().await;
        inner.data.insert(key.into(), value);
    }

    pub async fn get(&self, key: &str) -> Option<JsonValue> {
        self.inner.read().await.data.get(key).cloned()
    }

    /// Append to the global history, trimming FIFO to `max_history_length`.
    pub async fn push_history(&self, message: Message) {
        let mut inner = self.inner.write().await;
        inner.history.push(message);
        let max = inner.max_history_length;
        if inner.history.len() > max {
            let overflow = inner.history.len() - max;
            inner.history.drain(0..overflow);
        }
    }

    pub async fn history(&self) -> Vec<Message> {
        self.inner.read().await.history.clone()
    }

    /// Append to a specific agent's private message log.
    pub async fn push_agent_message(&self, agent_id: &str, message: Message) {
        let mut inner = self.inner.write().await;
        inner
            .agent_messages
            .entry(agent_id.to_string())
            .or_default()
            .push(message);
    }

    pub async fn agent_messages(&self, agent_id: &str) -> Vec<Message> {
        self.inner
            .read()
            .await
            .agent_messages
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        let inner = self.inner.read().await;
        ContextSnapshot {
            data: inner.data.clone(),
            history: inner.history.clone(),
            agent_messages: inner.agent_messages.clone(),
            timestamp: Utc::now(),
        }
    }

    pub async fn restore(&self, snapshot: &ContextSnapshot) {
        let mut inner = self.inner.write().await;
        inner.data = snapshot.data.clone();
        inner.history = snapshot.history.clone();
        inner.agent_messages = snapshot.agent_messages.clone();
    }

    /// An independent copy: mutations to the clone never appear in the
    /// original and vice versa.
    pub async fn deep_clone(&self) -> SharedContext {
        let inner = self.inner.read().await;
        SharedContext {
            inner: Arc::new(RwLock::new(Inner {
                data: inner.data.clone(),
                history: inner.history.clone(),
                agent_messages: inner.agent_messages.clone(),
                max_history_length: inner.max_history_length,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_restore_round_trip() {
        let ctx1 = SharedContext::new();
        ctx1.set("k", json!(1)).await;
        ctx1.push_history(Message::user("hi")).await;

        let ctx2 = SharedContext::new();
        let snap = ctx1.snapshot().await;
        ctx2.restore(&snap).await;

        let snap2 = ctx2.snapshot().await;
        assert_eq!(snap.data, snap2.data);
        assert_eq!(snap.history, snap2.history);
        assert_eq!(snap.agent_messages, snap2.agent_messages);
    }

    #[tokio::test]
    async fn clone_is_independent() {
        let ctx1 = SharedContext::new();
        ctx1.set("k", json!(1)).await;
        let ctx2 = ctx1.deep_clone().await;
        ctx2.set("k", json!(2)).await;
        assert_eq!(ctx1.get("k").await, Some(json!(1)));
        assert_eq!(ctx2.get("k").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn history_trims_fifo() {
        let ctx = SharedContext::with_max_history_length(2);
        ctx.push_history(Message::user("a")).await;
        ctx.push_history(Message::user("b")).await;
        ctx.push_history(Message::user("c")).await;
        let h = ctx.history().await;
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].content.as_ref(), "b");
        assert_eq!(h[1].content.as_ref(), "c");
    }
}
