//! Agent 错误类型与恢复动作
//!
//! 错误种类在产生处确定（模型客户端区分传输 / 协议错误），下游只按枚举匹配，不解析错误文本。
//! 与 RecoveryManager 配合：根据 AgentError 决定整轮回滚或通用修复。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::PersistenceError;

/// 单次请求中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 单次用户请求内模型 / 工具往返次数超过上限
    #[error("Step limit exceeded ({limit} model/tool round-trips)")]
    StepLimitExceeded { limit: usize },

    /// 连接层失败（网络、流中断、工具服务器断开）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 协议层失败（工具调用与结果配对错误、参数格式非法、API 拒绝）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 用户中断当前请求
    #[error("Cancelled by user")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Transport(msg) => AgentError::Transport(msg),
            LlmError::Protocol(msg) => AgentError::Protocol(msg),
        }
    }
}

/// 恢复管理器根据错误类型给出的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 整轮回滚：删除直到（含）触发请求的用户消息，原样重试会再次失控
    RollbackRequest,
    /// 通用修复：删除尾部直到（含）最近一条用户消息，使对话恢复可重放
    Repair,
}
