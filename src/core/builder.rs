//! Agent 构建器：从 AppConfig 组装模型客户端、工具分发器、会话线程与恢复管理器
//!
//! CLI 与测试共用同一套初始化逻辑；测试可用 with_llm / with_store 注入替身。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::Agent;
use crate::config::{AppConfig, LlmSection, PersistenceSection};
use crate::core::{AgentError, ConversationThread, RecoveryManager, TurnController};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{ConversationStore, InMemoryStore, PersistenceError, SqliteStore};
use crate::react::AgentLoop;
use crate::tools::{ToolDispatcher, ToolRegistry, ToolSpec};

/// 未配置系统提示词文件时使用
pub const DEFAULT_SYSTEM_PROMPT: &str = "Your name is Scout and you are an expert data scientist. \
You help customers manage their data science projects by leveraging the tools available to you. \
Work incrementally with the customer, keep the project's version history clean, \
and always use absolute paths when working with files.";

pub struct AgentBuilder {
    config: AppConfig,
    tools: ToolRegistry,
    system_prompt: Option<String>,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, tools: ToolRegistry) -> Self {
        Self {
            config,
            tools,
            system_prompt: None,
            llm: None,
            store: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 指定模型客户端（不再按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定持久化存储（不再按配置打开）
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<Agent, AgentError> {
        let app = &self.config.app;
        let system_prompt = match self.system_prompt {
            Some(p) => p,
            None => load_system_prompt(app.system_prompt_path.as_deref()),
        };
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config.llm, self.tools.specs(), &system_prompt),
        };
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.persistence)?,
        };

        let thread = ConversationThread::open(app.thread_id.clone(), store).await?;
        let controller = TurnController::new(llm).with_error_threshold(app.error_threshold);
        let dispatcher = ToolDispatcher::new(Arc::new(self.tools), app.max_concurrent_tools);
        let agent_loop = AgentLoop::new(controller, dispatcher).with_max_steps(app.max_steps);

        Ok(Agent::new(thread, agent_loop, RecoveryManager::new()))
    }
}

/// 有 API Key 时使用 OpenAI 兼容客户端，否则回退到 Mock
pub fn create_llm_from_config(
    cfg: &LlmSection,
    tools: &[ToolSpec],
    system_prompt: &str,
) -> Arc<dyn LlmClient> {
    match std::env::var(&cfg.api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::info!(model = %cfg.model, provider = %cfg.provider, "Using OpenAI-compatible LLM");
            Arc::new(
                OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, Some(&key))
                    .with_system_prompt(system_prompt)
                    .with_tools(tools.to_vec()),
            )
        }
        _ => {
            tracing::warn!(env = %cfg.api_key_env, "No API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

pub fn open_store(cfg: &PersistenceSection) -> Result<Arc<dyn ConversationStore>, PersistenceError> {
    match cfg.backend.to_lowercase().as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::open(&cfg.path)?)),
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        other => {
            tracing::warn!(backend = %other, "Unknown persistence backend, using memory");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// 读取系统提示词：配置路径优先，其次 config/prompts/system.md，最后内置默认
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let candidates: Vec<PathBuf> = path
        .map(Path::to_path_buf)
        .into_iter()
        .chain([
            PathBuf::from("config/prompts/system.md"),
            PathBuf::from("../config/prompts/system.md"),
        ])
        .collect();
    candidates
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_falls_back_to_mock() {
        let cfg = LlmSection {
            api_key_env: "SCOUT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmSection::default()
        };
        let llm = create_llm_from_config(&cfg, &[], DEFAULT_SYSTEM_PROMPT);
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }

    #[test]
    fn test_prompt_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "be brief").unwrap();
        assert_eq!(load_system_prompt(Some(&path)), "be brief");
    }

    #[test]
    fn test_sqlite_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PersistenceSection {
            backend: "sqlite".to_string(),
            path: dir.path().join("nested/conversations.db"),
        };
        assert!(open_store(&cfg).is_ok());
        assert!(dir.path().join("nested").is_dir());
    }
}
