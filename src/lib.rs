//! Scout - 终端对话智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（单条输入 -> 完整循环 -> 失败时回滚修复）
//! - **config**: 应用配置加载（TOML + 环境变量）与 MCP 服务器清单
//! - **core**: Turn Controller（熔断）、会话状态、错误与恢复、会话监管、构建器
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / Mock）、流式片段组装
//! - **memory**: 对话日志（Message Store）与持久化（内存 / SQLite）
//! - **observability**: tracing 日志初始化
//! - **react**: Agent 主循环与 Streaming Relay
//! - **tools**: 工具注册表、分发器、MCP stdio 客户端
//! - **ui**: 多行输入与终端着色输出

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod ui;

pub use agent::{Agent, SubmitOutcome};
