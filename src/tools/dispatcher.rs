//! 工具分发器
//!
//! 对 Assistant Turn 中的 N 个工具调用并发执行（信号量限流），按调用顺序产出 N 条 ToolResult。
//! 工具失败不会上抛：内容写为 "Error: <原因>"，交给 Turn Controller 的错误计数。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{FuturesOrdered, Stream};
use tokio::sync::Semaphore;

use crate::memory::{ToolCall, Turn, TOOL_ERROR_MARKER};
use crate::tools::{ToolCollaborator, ToolError};

/// 默认工具并发上限
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 3;

pub struct ToolDispatcher {
    tools: Arc<dyn ToolCollaborator>,
    permits: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(tools: Arc<dyn ToolCollaborator>, max_concurrent: usize) -> Self {
        Self {
            tools,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 执行单个调用并转为 ToolResult；任何失败都变成错误前缀文本
    pub async fn execute_one(&self, call: &ToolCall) -> Turn {
        let start = Instant::now();
        let result = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(_permit) => self.tools.execute(&call.name, call.arguments.clone()).await,
            Err(_) => Err(ToolError::Execution("tool pool closed".to_string())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::UnknownTool(_)) => "unknown_tool",
            Err(ToolError::Execution(_)) => "error",
            Err(ToolError::Transport(_)) => "transport",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        let content = match result {
            Ok(text) => text,
            Err(e) => format!("{TOOL_ERROR_MARKER} {e}"),
        };
        Turn::tool_result(call.id.clone(), call.name.clone(), content)
    }

    /// 并发执行全部调用，结果按调用顺序逐条产出（先完成的后位结果会等待前位）
    pub fn dispatch<'a>(&'a self, calls: &'a [ToolCall]) -> impl Stream<Item = Turn> + Send + 'a {
        calls
            .iter()
            .map(|call| self.execute_one(call))
            .collect::<FuturesOrdered<_>>()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use serde_json::Value;
    use std::time::Duration;

    use crate::tools::ToolSpec;

    /// "slow" 延迟后成功，"boom" 失败，其余未知
    struct Scripted;

    #[async_trait]
    impl ToolCollaborator for Scripted {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
            Ok(vec![])
        }

        async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
            match name {
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(format!("slow done {arguments}"))
                }
                "fast" => Ok("fast done".to_string()),
                "boom" => Err(ToolError::Execution("disk on fire".to_string())),
                other => Err(ToolError::UnknownTool(other.to_string())),
            }
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, serde_json::json!({"n": id}))
    }

    #[tokio::test]
    async fn test_results_keep_call_order() {
        let dispatcher = ToolDispatcher::new(Arc::new(Scripted), 4);
        let calls = vec![call("1", "slow"), call("2", "fast"), call("3", "boom")];
        let results: Vec<Turn> = dispatcher.dispatch(&calls).collect().await;

        let ids: Vec<String> = results
            .iter()
            .map(|t| match &t.kind {
                crate::memory::TurnKind::ToolResult { call_id, .. } => call_id.clone(),
                _ => panic!("expected tool result"),
            })
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(!results[0].is_error());
        assert!(!results[1].is_error());
        assert!(results[2].is_error());
        assert_eq!(results[2].content(), "Error: disk on fire");
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let dispatcher = ToolDispatcher::new(Arc::new(Scripted), 1);
        let turn = dispatcher.execute_one(&call("9", "missing")).await;
        assert!(turn.is_error());
        assert!(turn.content().contains("Unknown tool: missing"));
    }
}
