//! 会话状态：单线程独占的 ConversationState 与带持久化的 ConversationThread
//!
//! error_count 是派生值：加载时按 Turn Controller 的规则从历史重算，运行中由每次 advance 更新。

use std::sync::Arc;

use crate::core::controller::recompute_error_count;
use crate::memory::{ConversationStore, MessageStore, PersistenceError, Turn, TurnId};

/// 单个会话线程的内存状态
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub thread_id: String,
    pub messages: MessageStore,
    pub error_count: u32,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: MessageStore::new(),
            error_count: 0,
        }
    }

    /// 从已有历史恢复，并重算 error_count
    pub fn from_turns(thread_id: impl Into<String>, turns: Vec<Turn>) -> Self {
        let error_count = recompute_error_count(&turns);
        Self {
            thread_id: thread_id.into(),
            messages: MessageStore::from_turns(turns),
            error_count,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        self.messages.turns()
    }
}

/// 会话线程：内存状态 + 持久化存储，每次变更先落盘再更新内存
pub struct ConversationThread {
    state: ConversationState,
    store: Arc<dyn ConversationStore>,
}

impl ConversationThread {
    /// 打开线程：存储中有历史则加载，否则从空会话开始
    pub async fn open(
        thread_id: impl Into<String>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, PersistenceError> {
        let thread_id = thread_id.into();
        let state = match store.load(&thread_id).await? {
            Some(turns) => {
                tracing::info!(thread_id = %thread_id, turns = turns.len(), "Conversation loaded");
                ConversationState::from_turns(thread_id, turns)
            }
            None => ConversationState::new(thread_id),
        };
        Ok(Self { state, store })
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn thread_id(&self) -> &str {
        &self.state.thread_id
    }

    pub fn turns(&self) -> &[Turn] {
        self.state.turns()
    }

    pub fn error_count(&self) -> u32 {
        self.state.error_count
    }

    pub fn set_error_count(&mut self, count: u32) {
        self.state.error_count = count;
    }

    /// 追加一条 Turn
    pub async fn append(&mut self, turn: Turn) -> Result<TurnId, PersistenceError> {
        self.store
            .append(&self.state.thread_id, std::slice::from_ref(&turn))
            .await?;
        Ok(self.state.messages.append(turn))
    }

    /// 按 id 批量删除（一次墓碑批次）；返回实际删除的 id
    pub async fn remove(&mut self, ids: &[TurnId]) -> Result<Vec<TurnId>, PersistenceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.store.remove_by_ids(&self.state.thread_id, ids).await?;
        let removed = self.state.messages.remove_by_ids(ids);
        self.state.error_count = recompute_error_count(self.state.messages.turns());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, StoreEntry, ToolCall};
    use serde_json::json;

    #[tokio::test]
    async fn test_thread_persists_and_reloads() {
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryStore::new());
        let mut thread = ConversationThread::open("t1", Arc::clone(&store)).await.unwrap();
        assert!(thread.turns().is_empty());

        thread.append(Turn::user("hi")).await.unwrap();
        thread
            .append(Turn::assistant_with_calls(
                "",
                vec![ToolCall::new("c1", "read_file", json!({}))],
            ))
            .await
            .unwrap();
        thread
            .append(Turn::tool_result("c1", "read_file", "Error: not found"))
            .await
            .unwrap();
        thread
            .append(Turn::assistant_with_calls(
                "",
                vec![ToolCall::new("c2", "read_file", json!({}))],
            ))
            .await
            .unwrap();

        let reopened = ConversationThread::open("t1", store).await.unwrap();
        assert_eq!(reopened.turns().len(), 4);
        assert_eq!(reopened.error_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_writes_tombstones() {
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryStore::new());
        let mut thread = ConversationThread::open("t1", Arc::clone(&store)).await.unwrap();
        let a = thread.append(Turn::user("a")).await.unwrap();
        let b = thread.append(Turn::assistant("b")).await.unwrap();

        let removed = thread.remove(&[a, b]).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(thread.turns().is_empty());
        let tombstones = thread
            .state()
            .messages
            .log()
            .iter()
            .filter(|e| matches!(e, StoreEntry::Remove { .. }))
            .count();
        assert_eq!(tombstones, 2);
        assert_eq!(store.load("t1").await.unwrap().unwrap_or_default().len(), 0);
    }
}
