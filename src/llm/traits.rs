//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：invoke（返回完整 Assistant Turn）、
//! stream（返回增量片段流：文本 / 工具调用增量 / 结束原因）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::llm::TurnAssembler;
use crate::memory::Turn;

/// 模型调用错误；种类在客户端内部确定
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 网络 / 流中断等连接层失败
    #[error("{0}")]
    Transport(String),

    /// API 拒绝请求或返回无法解析的工具调用
    #[error("{0}")]
    Protocol(String),
}

/// 一轮生成结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other,
}

/// 模型流式输出的单个片段
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    /// 文本增量
    Text(String),
    /// 工具调用增量：name 只出现在开启该调用的片段上，arguments 为参数文本增量
    ToolCall {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// 本轮生成结束
    Finish(FinishReason),
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, LlmError>> + Send>>;

/// 模型协作方：给定有序 Turn 序列，返回下一条 Assistant Turn
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 流式生成
    async fn stream(&self, turns: &[Turn]) -> Result<FragmentStream, LlmError>;

    /// 非流式生成；默认实现消费 stream 并组装为 Turn
    async fn invoke(&self, turns: &[Turn]) -> Result<Turn, LlmError> {
        let mut stream = self.stream(turns).await?;
        let mut assembler = TurnAssembler::new();
        while let Some(fragment) = stream.next().await {
            assembler.push(&fragment?);
        }
        assembler.finish()
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
