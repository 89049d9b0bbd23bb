//! Agent 主循环
//!
//! User -> advance（模型 / 熔断）-> 有工具调用则分发并按序追加结果 -> 再次 advance，
//! 直到得到不带工具调用的 Assistant Turn、触发熔断，或超过最大步数。
//! 每次 advance 计为一步；模型调用与工具批次都可被取消。

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ConversationThread, TurnController};
use crate::memory::Turn;
use crate::react::StreamingRelay;
use crate::tools::ToolDispatcher;

/// 单次用户请求内默认最大步数（模型 / 工具往返）
pub const DEFAULT_MAX_STEPS: usize = 50;

/// 一次请求的结果
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// 终止的 Assistant Turn（模型最终回复或熔断通知）
    pub reply: Turn,
    pub steps: usize,
    pub tripped: bool,
}

pub struct AgentLoop {
    controller: TurnController,
    dispatcher: ToolDispatcher,
    max_steps: usize,
}

impl AgentLoop {
    pub fn new(controller: TurnController, dispatcher: ToolDispatcher) -> Self {
        Self {
            controller,
            dispatcher,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// 处理一条用户输入；失败时历史保留原样，由调用方交给 RecoveryManager
    pub async fn run(
        &self,
        thread: &mut ConversationThread,
        input: &str,
        mut relay: Option<&mut StreamingRelay>,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, AgentError> {
        thread.append(Turn::user(input)).await?;

        let mut steps = 0;
        loop {
            if steps >= self.max_steps {
                tracing::warn!(thread_id = %thread.thread_id(), limit = self.max_steps, "Step limit exceeded");
                return Err(AgentError::StepLimitExceeded {
                    limit: self.max_steps,
                });
            }
            steps += 1;

            let advance = self
                .controller
                .advance(thread.state(), relay.as_deref_mut(), cancel)
                .await?;
            thread.set_error_count(advance.error_count);
            let calls = advance.turn.tool_calls().to_vec();
            tracing::debug!(
                step = steps,
                error_count = advance.error_count,
                tool_calls = calls.len(),
                "Advance"
            );
            thread.append(advance.turn.clone()).await?;

            if advance.tripped || calls.is_empty() {
                return Ok(LoopOutcome {
                    reply: advance.turn,
                    steps,
                    tripped: advance.tripped,
                });
            }

            let results = self.dispatcher.dispatch(&calls);
            tokio::pin!(results);
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    next = results.next() => next,
                };
                let Some(result) = next else { break };
                thread.append(result).await?;
            }
        }
    }
}
