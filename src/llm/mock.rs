//! Mock LLM 客户端（用于测试与无 API Key 的离线运行）
//!
//! - MockLlmClient：回显最后一条用户消息，不调用工具。
//! - ScriptedLlmClient：按顺序返回预设的 Assistant Turn 或错误，并记录调用次数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{FinishReason, FragmentStream, LlmClient, LlmError, StreamFragment};
use crate::memory::{Turn, TurnKind};

/// 流式回放时每段字符数
const CHUNK_CHARS: usize = 6;

/// 将一条 Assistant Turn 拆成片段序列（文本分段、工具名与参数分开下发）
pub fn fragments_for(turn: &Turn) -> Vec<StreamFragment> {
    let mut out = Vec::new();
    let chars: Vec<char> = turn.content().chars().collect();
    for chunk in chars.chunks(CHUNK_CHARS) {
        out.push(StreamFragment::Text(chunk.iter().collect()));
    }
    for (index, call) in turn.tool_calls().iter().enumerate() {
        let index = index as u32;
        out.push(StreamFragment::ToolCall {
            index,
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            arguments: None,
        });
        out.push(StreamFragment::ToolCall {
            index,
            id: None,
            name: None,
            arguments: Some(call.arguments.to_string()),
        });
    }
    let reason = if turn.requests_tools() {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    };
    out.push(StreamFragment::Finish(reason));
    out
}

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn stream(&self, turns: &[Turn]) -> Result<FragmentStream, LlmError> {
        let last_user = turns
            .iter()
            .rev()
            .find_map(|t| match &t.kind {
                TurnKind::User { content } => Some(content.as_str()),
                TurnKind::Assistant { .. } | TurnKind::ToolResult { .. } => None,
            })
            .unwrap_or("(no input)");
        let reply = Turn::assistant(format!("Echo from Mock: {last_user}"));
        Ok(Box::pin(stream::iter(fragments_for(&reply).into_iter().map(Ok))))
    }
}

/// 预设脚本的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(Turn),
    Fail(LlmError),
}

/// 脚本化客户端：依次返回预设回复；脚本耗尽时返回 Protocol 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<ScriptStep>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedLlmClient {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 依次返回给定的 Turn
    pub fn replies(turns: impl IntoIterator<Item = Turn>) -> Self {
        Self::new(turns.into_iter().map(ScriptStep::Reply))
    }

    pub fn push(&self, step: ScriptStep) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }

    /// 模型被调用的次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时收到的 Turn 序列
    pub fn seen(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn stream(&self, turns: &[Turn]) -> Result<FragmentStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(turns.to_vec());
        }
        let step = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .ok_or_else(|| LlmError::Protocol("mock script exhausted".to_string()))?;
        match step {
            ScriptStep::Reply(turn) => {
                Ok(Box::pin(stream::iter(fragments_for(&turn).into_iter().map(Ok))))
            }
            ScriptStep::Fail(err) => Err(err),
        }
    }
}
