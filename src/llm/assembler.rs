//! 流式片段组装器
//!
//! 累积文本，按调用 index 缓冲工具名与参数增量，流结束后组装为 Assistant Turn。
//! 参数不是合法 JSON 时返回 Protocol 错误。

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::llm::{LlmError, StreamFragment};
use crate::memory::{ToolCall, Turn};

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// 将片段序列组装为一条 Assistant Turn
#[derive(Debug, Default)]
pub struct TurnAssembler {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &StreamFragment) {
        match fragment {
            StreamFragment::Text(delta) => self.text.push_str(delta),
            StreamFragment::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.calls.entry(*index).or_default();
                if call.id.is_none() {
                    call.id = id.clone();
                }
                if let Some(name) = name {
                    if call.name.is_empty() {
                        call.name = name.clone();
                    }
                }
                if let Some(delta) = arguments {
                    call.arguments.push_str(delta);
                }
            }
            StreamFragment::Finish(_) => {}
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> Result<Turn, LlmError> {
        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for (index, call) in self.calls {
            if call.name.is_empty() {
                return Err(LlmError::Protocol(format!(
                    "tool call #{index} has no function name"
                )));
            }
            let arguments = if call.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&call.arguments).map_err(|e| {
                    LlmError::Protocol(format!(
                        "malformed arguments for tool call '{}': {e}",
                        call.name
                    ))
                })?
            };
            let id = call
                .id
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            tool_calls.push(ToolCall::new(id, call.name, arguments));
        }
        Ok(Turn::assistant_with_calls(self.text, tool_calls))
    }
}
