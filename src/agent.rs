//! Headless Agent 运行时
//!
//! 持有会话线程、主循环与恢复管理器；submit 对单条用户输入跑完整循环，
//! 失败时按错误类型回滚历史，并把结果（完成 / 失败 + 是否修复）交给前端展示。

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ConversationThread, RecoveryAction, RecoveryManager};
use crate::memory::Turn;
use crate::react::{AgentLoop, StreamingRelay};

/// 一次请求的最终结果
#[derive(Debug)]
pub enum SubmitOutcome {
    Completed {
        reply: Turn,
        /// 是否为熔断通知
        tripped: bool,
    },
    Failed {
        error: AgentError,
        action: RecoveryAction,
        /// 回滚是否删除了内容；false 表示无可清理，历史需谨慎对待
        repaired: bool,
    },
}

pub struct Agent {
    thread: ConversationThread,
    agent_loop: AgentLoop,
    recovery: RecoveryManager,
}

impl Agent {
    pub fn new(thread: ConversationThread, agent_loop: AgentLoop, recovery: RecoveryManager) -> Self {
        Self {
            thread,
            agent_loop,
            recovery,
        }
    }

    pub fn thread(&self) -> &ConversationThread {
        &self.thread
    }

    /// 处理一条用户输入；模型或工具错误不会让调用方崩溃
    pub async fn submit(
        &mut self,
        input: &str,
        relay: Option<&mut StreamingRelay>,
        cancel: &CancellationToken,
    ) -> SubmitOutcome {
        match self.agent_loop.run(&mut self.thread, input, relay, cancel).await {
            Ok(outcome) => SubmitOutcome::Completed {
                reply: outcome.reply,
                tripped: outcome.tripped,
            },
            Err(error) => {
                let action = self.recovery.handle(&error);
                tracing::warn!(error = %error, ?action, "Request failed, repairing conversation");
                let repaired = match self.recovery.repair(&mut self.thread, action).await {
                    Ok(repaired) => repaired,
                    Err(e) => {
                        tracing::error!(error = %e, "Conversation repair failed");
                        false
                    }
                };
                SubmitOutcome::Failed {
                    error,
                    action,
                    repaired,
                }
            }
        }
    }
}
