//! SQLite 持久化集成测试：会话跨进程重启恢复，error_count 从历史重算

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scout::config::AppConfig;
    use scout::core::AgentBuilder;
    use scout::llm::ScriptedLlmClient;
    use scout::memory::{ConversationStore, SqliteStore, ToolCall, Turn};
    use scout::tools::ToolRegistry;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_conversation_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("conversations.db");

        {
            let store: Arc<dyn ConversationStore> = Arc::new(SqliteStore::open(&db).unwrap());
            let llm = Arc::new(ScriptedLlmClient::replies([
                Turn::assistant_with_calls(
                    "",
                    vec![ToolCall::new("c1", "missing_tool", json!({}))],
                ),
                Turn::assistant("That tool is unavailable."),
            ]));
            let mut agent = AgentBuilder::new(AppConfig::default(), ToolRegistry::new())
                .with_llm(llm)
                .with_store(store)
                .build()
                .await
                .unwrap();
            agent.submit("use it", None, &CancellationToken::new()).await;
            assert_eq!(agent.thread().turns().len(), 4);
            assert_eq!(agent.thread().error_count(), 1);
        }

        let store: Arc<dyn ConversationStore> = Arc::new(SqliteStore::open(&db).unwrap());
        let agent = AgentBuilder::new(AppConfig::default(), ToolRegistry::new())
            .with_llm(Arc::new(ScriptedLlmClient::default()))
            .with_store(store)
            .build()
            .await
            .unwrap();
        let turns = agent.thread().turns();
        assert_eq!(turns.len(), 4);
        assert!(turns[2].is_error());
        assert_eq!(turns[3].content(), "That tool is unavailable.");
        assert_eq!(agent.thread().error_count(), 1);
    }
}
