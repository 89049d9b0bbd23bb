//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；绑定工具定义与系统提示词，
//! 以流式方式生成，工具调用参数按 index 增量下发。请求体按 Chat Completions 线格式构造。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{CreateChatCompletionRequest, FinishReason as ApiFinishReason};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};

use crate::llm::{FinishReason, FragmentStream, LlmClient, LlmError, StreamFragment};
use crate::memory::{Turn, TurnKind};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名、系统提示词与工具定义
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: Option<String>,
    tools: Vec<ToolSpec>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            system_prompt: None,
            tools: Vec::new(),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 绑定模型可调用的工具
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// 构造流式请求体（线格式），再反序列化为 async_openai 请求类型
    fn build_request(&self, turns: &[Turn]) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut messages: Vec<Value> = Vec::with_capacity(turns.len() + 1);
        if let Some(system) = &self.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(turns.iter().map(wire_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !self.tools.is_empty() {
            body["tools"] = self
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
        }
        serde_json::from_value(body)
            .map_err(|e| LlmError::Protocol(format!("cannot build chat request: {e}")))
    }
}

/// 单条 Turn 转为 Chat Completions 消息
fn wire_message(turn: &Turn) -> Value {
    match &turn.kind {
        TurnKind::User { content } => json!({ "role": "user", "content": content }),
        TurnKind::Assistant {
            content,
            tool_calls,
        } => {
            let mut msg = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() },
                        })
                    })
                    .collect();
            }
            msg
        }
        TurnKind::ToolResult {
            call_id, content, ..
        } => json!({ "role": "tool", "tool_call_id": call_id, "content": content }),
    }
}

/// 错误分类在此确定：API 拒绝 / 请求非法为 Protocol，其余为 Transport
fn classify(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(..) | OpenAIError::InvalidArgument(..) | OpenAIError::JSONDeserialize(..) => {
            LlmError::Protocol(err.to_string())
        }
        other => LlmError::Transport(other.to_string()),
    }
}

fn map_finish(reason: &ApiFinishReason) -> FinishReason {
    match reason {
        ApiFinishReason::Stop => FinishReason::Stop,
        ApiFinishReason::ToolCalls => FinishReason::ToolCalls,
        ApiFinishReason::Length => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn stream(&self, turns: &[Turn]) -> Result<FragmentStream, LlmError> {
        let request = self.build_request(turns)?;
        let response = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(classify)?;

        let usage = self.usage.clone();
        let fragments = response.flat_map(move |item| {
            let out: Vec<Result<StreamFragment, LlmError>> = match item {
                Err(e) => vec![Err(classify(e))],
                Ok(chunk) => {
                    if let Some(u) = &chunk.usage {
                        usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
                    }
                    let mut out = Vec::new();
                    for choice in chunk.choices {
                        if let Some(text) = choice.delta.content {
                            if !text.is_empty() {
                                out.push(Ok(StreamFragment::Text(text)));
                            }
                        }
                        for call in choice.delta.tool_calls.unwrap_or_default() {
                            let (name, arguments) = match call.function {
                                Some(f) => (f.name, f.arguments),
                                None => (None, None),
                            };
                            out.push(Ok(StreamFragment::ToolCall {
                                index: call.index,
                                id: call.id,
                                name,
                                arguments,
                            }));
                        }
                        if let Some(reason) = &choice.finish_reason {
                            out.push(Ok(StreamFragment::Finish(map_finish(reason))));
                        }
                    }
                    out
                }
            };
            stream::iter(out)
        });
        Ok(Box::pin(fragments))
    }
}
