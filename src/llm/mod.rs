//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、流式片段组装

pub mod assembler;
pub mod mock;
pub mod openai;
pub mod traits;

pub use assembler::TurnAssembler;
pub use mock::{MockLlmClient, ScriptStep, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{FinishReason, FragmentStream, LlmClient, LlmError, StreamFragment};
