//! 展示事件：Streaming Relay 把模型片段翻译成的终端 / 前端可渲染事件

use serde::Serialize;

/// 单个展示事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayEvent {
    /// 模型文本增量，原样转发
    Text { text: String },
    /// 某个调用序号的工具开始（每轮每个序号只出现一次）
    ToolStarted { index: u32, name: String },
    /// 工具参数增量，原样转发
    ToolArgs { index: u32, delta: String },
    /// 本轮因工具调用结束
    RoundSeparator,
    /// 非模型生成的提示（如熔断通知）
    Notice { text: String },
}
